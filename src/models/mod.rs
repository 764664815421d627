pub mod endpoint;
pub mod installation;
