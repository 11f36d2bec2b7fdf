pub mod cleanup;
pub mod multierr;
