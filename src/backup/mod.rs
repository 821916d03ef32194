pub mod backup_config;
pub mod engine;
pub mod launcher;
pub mod metrics;
pub mod notifications;
pub mod parse;
pub mod pipeline;
pub mod redacted;
pub mod result_error;
pub mod runtime;
pub mod validate;
pub mod volume;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
