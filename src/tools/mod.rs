mod declaration;
pub use declaration::*;

mod docker_tools;
pub use docker_tools::*;

mod github_tools;
pub use github_tools::*;

mod registry;
pub use registry::*;

mod shell;
pub use shell::*;

mod web;
pub use web::*;
