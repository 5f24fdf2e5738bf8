pub mod logging;
pub mod paths;
pub mod text;
