use crate::utils::error::{AppError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_GOOGLE_BASE_URL: &str = "https://maps.googleapis.com";
pub const DEFAULT_STRIPE_BASE_URL: &str = "https://api.stripe.com";
pub const DEFAULT_QR_SERVICE_URL: &str =
    "https://api.qrserver.com/v1/create-qr-code/?size=220x220&data={data}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub openai: Option<OpenAiSection>,
    pub google: Option<GoogleSection>,
    pub stripe: Option<StripeSection>,
    pub pdf: Option<PdfSection>,
    pub maintenance: Option<MaintenanceSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: u16,
    pub public_base_url: String,
    pub frontend_url: String,
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSection {
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleSection {
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeSection {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
    pub prices: StripePrices,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StripePrices {
    pub starter: Option<String>,
    pub growth: Option<String>,
    pub pro: Option<String>,
    pub addon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfSection {
    pub program: String,
    pub args: Option<Vec<String>>,
    pub qr_service_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceSection {
    pub stale_draft_days: Option<u32>,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(AppError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| AppError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${STRIPE_SECRET_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| AppError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_positive_number("server.port", self.server.port as usize, 1)?;
        validation::validate_url("server.public_base_url", &self.server.public_base_url)?;
        validation::validate_url("server.frontend_url", &self.server.frontend_url)?;
        if let Some(origins) = &self.server.cors_origins {
            for origin in origins {
                validation::validate_url("server.cors_origins", origin)?;
            }
        }

        validation::validate_path("database.path", &self.database.path)?;

        validation::validate_non_empty_string("auth.jwt_secret", &self.auth.jwt_secret)?;
        if self.auth.jwt_secret.len() < 16 {
            return Err(AppError::InvalidConfigValueError {
                field: "auth.jwt_secret".to_string(),
                value: "<redacted>".to_string(),
                reason: "Secret must be at least 16 characters".to_string(),
            });
        }

        if let Some(openai) = &self.openai {
            validation::validate_non_empty_string("openai.api_key", &openai.api_key)?;
            validation::validate_url("openai.base_url", &self.openai_base_url())?;
        }

        if let Some(google) = &self.google {
            validation::validate_non_empty_string("google.api_key", &google.api_key)?;
            validation::validate_url("google.base_url", &self.google_base_url())?;
        }

        if let Some(stripe) = &self.stripe {
            validation::validate_non_empty_string("stripe.secret_key", &stripe.secret_key)?;
            validation::validate_non_empty_string("stripe.webhook_secret", &stripe.webhook_secret)?;
            validation::validate_url("stripe.base_url", &self.stripe_base_url())?;
            validation::validate_url("stripe.success_url", &stripe.success_url)?;
            validation::validate_url("stripe.cancel_url", &stripe.cancel_url)?;
            validation::validate_url("stripe.portal_return_url", &stripe.portal_return_url)?;
        }

        if let Some(pdf) = &self.pdf {
            validation::validate_non_empty_string("pdf.program", &pdf.program)?;
        }

        validation::validate_range("maintenance.stale_draft_days", self.stale_draft_days(), 1, 3650)?;

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!(
            "{}:{}",
            self.server.host.as_deref().unwrap_or("0.0.0.0"),
            self.server.port
        )
    }

    pub fn openai_base_url(&self) -> String {
        self.openai
            .as_ref()
            .and_then(|o| o.base_url.clone())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
    }

    pub fn google_base_url(&self) -> String {
        self.google
            .as_ref()
            .and_then(|g| g.base_url.clone())
            .unwrap_or_else(|| DEFAULT_GOOGLE_BASE_URL.to_string())
    }

    pub fn stripe_base_url(&self) -> String {
        self.stripe
            .as_ref()
            .and_then(|s| s.base_url.clone())
            .unwrap_or_else(|| DEFAULT_STRIPE_BASE_URL.to_string())
    }

    pub fn pdf_program(&self) -> (String, Vec<String>) {
        match &self.pdf {
            Some(pdf) => (
                pdf.program.clone(),
                pdf.args.clone().unwrap_or_else(|| vec!["-".into(), "-".into()]),
            ),
            None => ("weasyprint".to_string(), vec!["-".into(), "-".into()]),
        }
    }

    pub fn qr_service_url(&self) -> String {
        self.pdf
            .as_ref()
            .and_then(|p| p.qr_service_url.clone())
            .unwrap_or_else(|| DEFAULT_QR_SERVICE_URL.to_string())
    }

    pub fn stale_draft_days(&self) -> u32 {
        self.maintenance
            .as_ref()
            .and_then(|m| m.stale_draft_days)
            .unwrap_or(30)
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[server]
port = 5001
public_base_url = "https://api.guidewise.test"
frontend_url = "https://guidewise.test"

[database]
path = "./guidewise.db"

[auth]
jwt_secret = "0123456789abcdef0123"
"#;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = TomlConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.server.port, 5001);
        assert_eq!(config.bind_address(), "0.0.0.0:5001");
        assert_eq!(config.database.path, "./guidewise.db");
        assert!(config.stripe.is_none());
        assert_eq!(config.stale_draft_days(), 30);
        assert_eq!(config.stripe_base_url(), DEFAULT_STRIPE_BASE_URL);
        assert_eq!(config.pdf_program().0, "weasyprint");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("GUIDEWISE_TEST_JWT_SECRET", "super-secret-signing-key");

        let toml_content = r#"
[server]
port = 5001
public_base_url = "https://api.guidewise.test"
frontend_url = "https://guidewise.test"

[database]
path = "./guidewise.db"

[auth]
jwt_secret = "${GUIDEWISE_TEST_JWT_SECRET}"

[openai]
api_key = "${GUIDEWISE_TEST_UNSET_VARIABLE}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.auth.jwt_secret, "super-secret-signing-key");
        assert_eq!(
            config.openai.unwrap().api_key,
            "${GUIDEWISE_TEST_UNSET_VARIABLE}"
        );

        std::env::remove_var("GUIDEWISE_TEST_JWT_SECRET");
    }

    #[test]
    fn test_config_validation() {
        let toml_content = BASIC.replace("https://guidewise.test", "invalid-url");
        let config = TomlConfig::from_toml_str(&toml_content).unwrap();
        assert!(config.validate().is_err());

        let short_secret = BASIC.replace("0123456789abcdef0123", "short");
        let config = TomlConfig::from_toml_str(&short_secret).unwrap();
        assert!(matches!(
            config.validate(),
            Err(AppError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_stripe_section_parsing() {
        let toml_content = format!(
            r#"{}
[stripe]
secret_key = "sk_test_123"
webhook_secret = "whsec_123"
success_url = "https://guidewise.test/upgrade?success=1"
cancel_url = "https://guidewise.test/pricing"
portal_return_url = "https://guidewise.test/dashboard/billing"

[stripe.prices]
starter = "price_starter"
pro = "price_pro"
"#,
            BASIC
        );

        let config = TomlConfig::from_toml_str(&toml_content).unwrap();
        let stripe = config.stripe.as_ref().unwrap();
        assert_eq!(stripe.prices.starter.as_deref(), Some("price_starter"));
        assert!(stripe.prices.growth.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.server.frontend_url, "https://guidewise.test");
    }

    #[test]
    fn test_example_config_is_valid() {
        let config =
            TomlConfig::from_toml_str(include_str!("../../guidewise.example.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.stale_draft_days(), 30);
        assert_eq!(config.pdf_program().0, "weasyprint");
    }
}
