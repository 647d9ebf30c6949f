pub mod error;
pub mod media;
pub mod resize;
pub mod upload;

pub use error::ServiceError;
pub use resize::{ALLOWED_SIZES, Rendition, ResizeClient, resize_batch, resize_engine};
pub use upload::{TokenSource, UploadClient, UploadReceipt, upload_batch, upload_engine, upload_items};
