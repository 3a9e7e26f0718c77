//! 身份校验 / Handshake identity verification

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// 身份提供者接口 / Identity provider interface
///
/// 校验握手中的 `uid` 与令牌，返回已验证的用户ID。
/// Verifies the handshake `uid` and token, returning the verified user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, uid: &str, token: &str) -> AppResult<String>;
}

/// 共享密钥身份校验：token = hex(HMAC-SHA256(secret, uid))
/// Shared-secret identity: `token = hex(HMAC-SHA256(secret, uid))`
pub struct SharedSecretIdentity {
    secret: Vec<u8>,
}

impl SharedSecretIdentity {
    pub fn new(secret: &str) -> Self {
        Self { secret: secret.as_bytes().to_vec() }
    }

    fn mac(&self) -> AppResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid hmac key: {}", e)))
    }

    /// 签发令牌（供测试与上游服务使用）/ Issue a token for `uid`
    pub fn issue(&self, uid: &str) -> AppResult<String> {
        let mut mac = self.mac()?;
        mac.update(uid.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl IdentityProvider for SharedSecretIdentity {
    async fn verify(&self, uid: &str, token: &str) -> AppResult<String> {
        let signature = hex::decode(token).map_err(|_| AppError::unauthenticated("malformed token"))?;
        let mut mac = self.mac()?;
        mac.update(uid.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AppError::unauthenticated("invalid token"))?;
        Ok(uid.to_string())
    }
}
