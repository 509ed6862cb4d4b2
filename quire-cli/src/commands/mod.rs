pub mod cleanup;
pub mod diff;
pub mod publish;
pub mod site_config;
pub mod status;
