use crate::utils::error::{AppError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(AppError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(AppError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(AppError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(AppError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(AppError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(AppError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(AppError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// 請求內容的長度檢查，回傳 400 而不是設定錯誤
pub fn validate_max_len(field_name: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(AppError::validation(format!(
            "{} must be at most {} characters",
            field_name, max
        )));
    }
    Ok(())
}

pub fn validate_max_items<T>(field_name: &str, items: &[T], max: usize) -> Result<()> {
    if items.len() > max {
        return Err(AppError::validation(format!(
            "{} accepts at most {} items",
            field_name, max
        )));
    }
    Ok(())
}

/// 會出現在頁面 href/src 的網址：只接受 http(s) 或站內路徑
pub fn validate_link_url(field_name: &str, value: &str) -> Result<()> {
    if value.starts_with('/') && !value.starts_with("//") && !value.starts_with("/\\") {
        return Ok(());
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(AppError::validation(format!(
            "{} must be an http(s) URL or a site path",
            field_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("server.public_base_url", "https://example.com").is_ok());
        assert!(validate_url("server.public_base_url", "http://example.com").is_ok());
        assert!(validate_url("server.public_base_url", "").is_err());
        assert!(validate_url("server.public_base_url", "invalid-url").is_err());
        assert!(validate_url("server.public_base_url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("server.port", 5, 1).is_ok());
        assert!(validate_positive_number("server.port", 0, 1).is_err());
    }

    #[test]
    fn test_validate_request_lengths() {
        assert!(validate_max_len("property_name", "Cabin", 10).is_ok());
        assert!(validate_max_len("property_name", "A very long cabin name", 10).is_err());
        assert!(validate_max_items("rules", &[1, 2, 3], 3).is_ok());
        assert!(validate_max_items("rules", &[1, 2, 3, 4], 3).is_err());
    }

    #[test]
    fn test_validate_link_url() {
        assert!(validate_link_url("cover_image_url", "https://cdn.test/a.jpg").is_ok());
        assert!(validate_link_url("image_url", "/api/place-photo?photo_reference=x").is_ok());
        assert!(validate_link_url("media_url", "javascript:alert(1)").is_err());
        assert!(validate_link_url("media_url", "JavaScript:alert(1)").is_err());
        assert!(validate_link_url("media_url", "data:text/html,hi").is_err());
        assert!(validate_link_url("media_url", "//evil.test/x").is_err());
        assert!(validate_link_url("media_url", "/\\evil.test/x").is_err());
    }
}
