//! The `File` API: a named `Blob` with a modification timestamp, plus the
//! host-side `File.fromPath` constructor for path-backed files.
//!
//! More information:
//!  - [W3C `File` specification][spec]
//!
//! [spec]: https://w3c.github.io/FileAPI/#file-section

use std::path::PathBuf;

use boa_engine::{
    js_string,
    object::Object,
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{empty_trace, Finalize, GcRefMut, Trace};
use strand_core::{
    accessor,
    error::named_error,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    value::IntoJs,
};

use super::blob::{Blob, BlobClass, BlobParts, BlobPropertyBag};

#[derive(Clone)]
pub struct File {
    blob: Blob,
    name: String,
    last_modified: i64,
}

impl Finalize for File {}

unsafe impl Trace for File {
    empty_trace!();
}

impl File {
    /// https://w3c.github.io/FileAPI/#file-constructor
    pub fn new(
        file_bits: BlobParts,
        file_name: String,
        options: Option<FilePropertyBag>,
        context: &mut Context,
    ) -> JsResult<Self> {
        let (blob_options, last_modified) = match options {
            Some(options) => (Some(options.blob_property_bag), options.last_modified),
            None => (None, None),
        };
        let blob = Blob::new(Some(file_bits), blob_options, context)?;
        let last_modified = last_modified.unwrap_or_else(now_millis);
        Ok(Self {
            blob,
            name: file_name,
            last_modified,
        })
    }

    /// Opens a path-backed file: stat (following symlinks), MIME inferred
    /// from the extension, `lastModified` from the filesystem mtime.
    pub fn open_path(path: &str, context: &mut Context) -> JsResult<Self> {
        let path = PathBuf::from(path);
        let metadata = std::fs::metadata(&path).map_err(|err| {
            named_error(
                "NotFoundError",
                &format!("Cannot open {}: {err}", path.display()),
                context,
            )
        })?;
        if !metadata.is_file() {
            return Err(named_error(
                "NotFoundError",
                &format!("{} is not a regular file", path.display()),
                context,
            ));
        }

        let mime = mime_guess::from_path(&path)
            .first_raw()
            .unwrap_or("application/octet-stream");
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|modified| {
                modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .ok()
                    .map(|duration| duration.as_millis() as i64)
            })
            .unwrap_or_else(now_millis);

        Ok(Self {
            blob: Blob::from_path(path, metadata.len(), mime),
            name,
            last_modified,
        })
    }

    /// Wraps an existing blob under a file name (used by `FormData` file
    /// entries).
    pub fn from_blob(blob: Blob, name: String) -> Self {
        Self {
            blob,
            name,
            last_modified: now_millis(),
        }
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    pub fn name(&self) -> String {
        self.name.clone()
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn size(&self) -> u64 {
        self.blob.size()
    }

    pub fn type_(&self) -> String {
        self.blob.type_()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl File {
    pub fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("Failed to convert js value into rust type `File`")
                    .into()
            })
    }
}

#[derive(Default)]
pub struct FilePropertyBag {
    blob_property_bag: BlobPropertyBag,
    last_modified: Option<i64>,
}

impl TryFromJs for FilePropertyBag {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let blob_property_bag = BlobPropertyBag::try_from_js(value, context)?;

        let obj = value.as_object().ok_or_else(|| {
            JsNativeError::typ().with_message("Expected object")
        })?;

        let last_modified = obj.get(js_string!("lastModified"), context)?;
        let last_modified = if last_modified.is_undefined() {
            None
        } else {
            Some(last_modified.to_number(context)? as i64)
        };

        Ok(Self {
            blob_property_bag,
            last_modified,
        })
    }
}

pub struct FileClass;

impl FileClass {
    fn name(context: &mut Context) -> Accessor {
        accessor!(
            context,
            File,
            "name",
            get:((file, context) => Ok(file.name().into_js(context)))
        )
    }

    fn last_modified(context: &mut Context) -> Accessor {
        accessor!(
            context,
            File,
            "lastModified",
            get:((file, _context) => Ok(file.last_modified().into()))
        )
    }

    fn size(context: &mut Context) -> Accessor {
        accessor!(
            context,
            File,
            "size",
            get:((file, _context) => Ok(file.size().into()))
        )
    }

    fn type_(context: &mut Context) -> Accessor {
        accessor!(
            context,
            File,
            "type",
            get:((file, context) => Ok(file.type_().into_js(context)))
        )
    }

    fn text(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let blob = File::try_from_js(this)?.blob.clone();
        blob.text(context)
    }

    fn array_buffer(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let blob = File::try_from_js(this)?.blob.clone();
        blob.array_buffer(context)
    }

    fn stream(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let blob = File::try_from_js(this)?.blob.clone();
        blob.stream(context)
    }

    fn slice(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let file = File::try_from_js(this)?;
        let start: Option<i64> = args.get_or_undefined(0).try_js_into(context)?;
        let end: Option<i64> = args.get_or_undefined(1).try_js_into(context)?;
        let content_type: Option<String> =
            args.get_or_undefined(2).try_js_into(context)?;
        let blob = file.blob.slice(start, end, content_type);
        let blob = JsNativeObject::new::<BlobClass>(blob, context)?;

        Ok(blob.to_inner())
    }

    fn from_path(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let path = args.get_or_undefined(0);
        let Some(path) = path.as_string() else {
            return Err(JsNativeError::typ()
                .with_message("File.fromPath expects a path string")
                .into());
        };
        let path = path.to_std_string().map_err(|_| {
            JsNativeError::typ().with_message("File.fromPath expects a valid path")
        })?;
        let file = File::open_path(&path, context)?;
        Ok(JsNativeObject::new::<FileClass>(file, context)?.to_inner())
    }
}

impl NativeClass for FileClass {
    type Instance = File;

    const NAME: &'static str = "File";

    const LENGTH: usize = 2;

    fn constructor(
        _this: &JsNativeObject<File>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<File> {
        let file_bits: BlobParts = args.get_or_undefined(0).try_js_into(context)?;
        let file_name: String = args.get_or_undefined(1).try_js_into(context)?;
        let options: Option<FilePropertyBag> =
            args.get_or_undefined(2).try_js_into(context)?;

        File::new(file_bits, file_name, options, context)
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let name = Self::name(class.context());
        let last_modified = Self::last_modified(class.context());
        let size = Self::size(class.context());
        let type_ = Self::type_(class.context());

        class
            .accessor(js_string!("name"), name, Attribute::all())
            .accessor(js_string!("lastModified"), last_modified, Attribute::all())
            .accessor(js_string!("size"), size, Attribute::all())
            .accessor(js_string!("type"), type_, Attribute::all())
            .static_method(
                js_string!("fromPath"),
                1,
                NativeFunction::from_fn_ptr(Self::from_path),
            )
            .method(
                js_string!("text"),
                0,
                NativeFunction::from_fn_ptr(Self::text),
            )
            .method(
                js_string!("arrayBuffer"),
                0,
                NativeFunction::from_fn_ptr(Self::array_buffer),
            )
            .method(
                js_string!("stream"),
                0,
                NativeFunction::from_fn_ptr(Self::stream),
            )
            .method(
                js_string!("slice"),
                0,
                NativeFunction::from_fn_ptr(Self::slice),
            );

        Ok(())
    }
}

pub struct FileApi;

impl strand_core::Api for FileApi {
    fn init(self, context: &mut Context) {
        register_global_class::<FileClass>(context)
            .expect("The `File` class shouldn't exist yet")
    }
}
