mod svr;

pub use svr::{Faults, ServeArgs, build_app, startup};
