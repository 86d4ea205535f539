//! DocumentService: generic document CRUD using the safe SQL builder.

mod documents;
mod validation;
pub use documents::DocumentService;
pub use validation::{DocumentBody, RequestValidator};
