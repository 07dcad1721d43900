pub(crate) mod common;

mod cleanup;
