pub mod check_config;
pub mod launch;
pub mod serve;
