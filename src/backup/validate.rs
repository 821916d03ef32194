//! Validation functions for configuration values.
//!
//! Checks remote target URLs, duplicity time specifications and image
//! references before any container is launched.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use validator::ValidationError;

static URL_SCHEME_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:[^\s]+$").expect("valid url scheme regex")
});

/// Intervals like `30D`, `1W2D`, `12h`, absolute dates, epoch seconds or `now`.
static TIME_SPEC_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(now|\d+|(\d+[smhDWMY])+|\d{4}-\d{2}-\d{2}([T ][0-9:]+)?|\d{1,2}/\d{1,2}/\d{4})$")
        .expect("valid time spec regex")
});

pub fn validate_target_url<S: AsRef<str>>(url: S) -> Result<(), ValidationError> {
    let url = url.as_ref();
    if !URL_SCHEME_RX.is_match(url) {
        return Err(ValidationError::new("InvalidTargetUrl").with_message(
            format!("{url:?} is not a URL with a storage scheme (e.g. s3://, swift://, file://)")
                .into(),
        ));
    }

    Ok(())
}

pub fn validate_time_spec<S: AsRef<str>>(spec: S) -> Result<(), ValidationError> {
    let spec = spec.as_ref();
    if !is_time_spec(spec) {
        return Err(ValidationError::new("InvalidTimeSpec")
            .with_message(format!("Invalid time specification: {spec:?}").into()));
    }

    Ok(())
}

pub fn is_time_spec(spec: &str) -> bool {
    TIME_SPEC_RX.is_match(spec)
}

pub fn validate_image_ref<S: AsRef<str>>(image: S) -> Result<(), ValidationError> {
    let image = image.as_ref();
    if image.is_empty() || image.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("InvalidImage")
            .with_message(format!("Invalid image reference: {image:?}").into()));
    }

    Ok(())
}

pub fn validate_parent_dir_exist<P: AsRef<Path>>(file: P) -> Result<(), ValidationError> {
    let file = file.as_ref();
    match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()))
        }
        _ => Ok(()),
    }
}
