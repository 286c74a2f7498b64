//! Service layer separating file I/O from processing logic

pub mod io;

pub use io::{collect_image_files, unique_output_path, FileStore, ImageIoService};
