use boa_engine::Context;
use strand_core::Api;

pub mod blob;
pub mod file;
pub mod reader;

pub use blob::{Blob, BlobClass};
pub use file::{File, FileClass};
pub use reader::{FileReader, FileReaderClass};

pub struct FileApi;

impl Api for FileApi {
    fn init(self, context: &mut Context) {
        blob::BlobApi.init(context);
        file::FileApi.init(context);
        reader::FileReaderApi.init(context);
    }
}
