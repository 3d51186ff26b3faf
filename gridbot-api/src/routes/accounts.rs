//! Exchange account provisioning (spec.md §6 HTTP API table, §6.5
//! credential encryption at rest).

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use gridbot_engine::StoredCredentials;
use gridbot_model::entities::{Exchange, ExchangeAccount};
use gridbot_model::ids::{ExchangeAccountId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub user_id: String,
    pub name: String,
    pub exchange: Exchange,
    pub is_testnet: bool,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: ExchangeAccountId,
    pub user_id: UserId,
    pub name: String,
    pub exchange: Exchange,
    pub is_testnet: bool,
}

impl From<ExchangeAccount> for AccountResponse {
    fn from(a: ExchangeAccount) -> Self {
        Self { id: a.id, user_id: a.user_id, name: a.name, exchange: a.exchange, is_testnet: a.is_testnet }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    if !req.is_testnet && state.cipher.is_none() {
        return Err(ApiError::Forbidden {
            code: "MAINNET_ACCOUNT_FORBIDDEN",
            message: "mainnet accounts require CREDENTIALS_ENCRYPTION_KEY to be configured".into(),
        });
    }
    let cipher = state
        .cipher
        .as_ref()
        .ok_or_else(|| ApiError::Internal("CREDENTIALS_ENCRYPTION_KEY is not configured".into()))?;

    let plaintext = serde_json::to_string(&StoredCredentials { api_key: req.api_key, api_secret: req.api_secret })
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let encrypted_credentials = cipher.encrypt(&plaintext)?;

    let account = ExchangeAccount {
        id: ExchangeAccountId::random(),
        user_id: UserId::new(req.user_id),
        name: req.name,
        exchange: req.exchange,
        is_testnet: req.is_testnet,
        encrypted_credentials,
    };
    let created = state.store.create_exchange_account(account).await?;
    Ok(Json(created.into()))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ApiError> {
    let account_id = ExchangeAccountId::new(id);
    state.store.delete_exchange_account(&account_id).await?;
    state.provider.evict(&account_id);
    Ok(())
}
