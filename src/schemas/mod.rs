mod model_response;
pub use model_response::*;

mod plan;
pub use plan::*;

mod react;
pub use react::*;

mod token_usage;
pub use token_usage::*;

mod tool_call;
pub use tool_call::*;
