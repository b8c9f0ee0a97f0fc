use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use civica_common::types::{Department, Role};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    name: String,
    role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    department: Option<Department>,
    iat: i64,
    exp: i64,
}

/// The identity carried by a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccess {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    /// Set only for admin accounts; names the department they manage.
    pub department: Option<Department>,
}

#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        name: &str,
        role: Role,
        department: Option<Department>,
    ) -> anyhow::Result<String> {
        self.issue_access_token_at(user_id, name, role, department, current_unix_timestamp()?)
    }

    fn issue_access_token_at(
        &self,
        user_id: Uuid,
        name: &str,
        role: Role,
        department: Option<Department>,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            name: name.to_string(),
            role,
            department,
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn validate_access_token(&self, token: &str) -> anyhow::Result<UserAccess> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("access token subject '{}' is not a UUID", claims.sub))?;

        if claims.role == Role::Admin && claims.department.is_none() {
            return Err(anyhow!("admin access token is missing a department claim"));
        }

        Ok(UserAccess {
            user_id,
            name: claims.name,
            role: claims.role,
            department: claims.department,
        })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
