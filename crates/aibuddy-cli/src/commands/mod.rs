pub(crate) mod admin;
pub(crate) mod assist;
pub(crate) mod server;
