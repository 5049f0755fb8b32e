mod common;
mod vault;
