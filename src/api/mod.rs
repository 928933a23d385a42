//! Shared API response and pagination types

pub mod pagination;
pub mod response;

pub use pagination::{Paginated, PaginationParams};
pub use response::{DataResponse, NoContent};
