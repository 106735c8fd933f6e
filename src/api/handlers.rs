//! HTTP handlers for the six read endpoints spec.md §6 names.

use super::types::{
    ApiError, BalanceResponse, HealthResponse, HoldersCountResponse, HoldersQuery, TokenResponse,
    TransactionResponse, UtxoEntry, UtxoListResponse, UtxoQuery,
};
use crate::amount::Amount;
use crate::cache::{CacheManager, CachedBalance};
use crate::metrics;
use crate::query::QueryService;
use crate::storage::StorageEngine;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub query: Arc<QueryService>,
    pub storage: Arc<StorageEngine>,
    pub cache: Arc<CacheManager>,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn not_found(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::NOT_FOUND, Json(ApiError::new(message)))
}

fn internal_error(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::new(message)))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError::new(message)))
}

/// GET /address/{address}/balance
pub async fn get_balance(State(state): State<ApiState>, Path(address): Path<String>) -> ApiResult<BalanceResponse> {
    if let Some(cached) = state.cache.get_balance(&address).await {
        metrics::record_http_request("address_balance", "2xx");
        return Ok(Json(BalanceResponse {
            address,
            rxd_balance: cached.rxd_balance,
            glyph_tokens: cached.glyph_tokens,
            utxo_count: cached.utxo_count,
        }));
    }

    let detail = state.query.get_balance(&address).await.map_err(|e| {
        metrics::record_http_request("address_balance", "5xx");
        internal_error(e.to_string())
    })?;

    let glyph_tokens: BTreeMap<String, String> =
        detail.token_balances.iter().map(|(ref_, amount)| (ref_.clone(), amount.to_string())).collect();
    let cached = CachedBalance {
        rxd_balance: detail.rxd_balance.to_string(),
        glyph_tokens: glyph_tokens.clone(),
        utxo_count: detail.utxo_count,
    };
    state.cache.put_balance(&address, cached).await;
    metrics::record_http_request("address_balance", "2xx");
    Ok(Json(BalanceResponse { address, rxd_balance: detail.rxd_balance.to_string(), glyph_tokens, utxo_count: detail.utxo_count }))
}

/// GET /address/{address}/utxos?unspent_only&page&page_size
pub async fn list_utxos(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(params): Query<UtxoQuery>,
) -> ApiResult<UtxoListResponse> {
    let unspent_only = params.unspent_only.unwrap_or(true);
    let page = params.page.unwrap_or(0);
    let page_size = params.page_size.unwrap_or(50).clamp(1, 500);

    let page_result = state
        .query
        .list_utxos(&address, unspent_only, page, page_size)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(UtxoListResponse {
        items: page_result.items.into_iter().map(UtxoEntry::from).collect(),
        page: page_result.page,
        page_size: page_result.page_size,
        total: page_result.total,
    }))
}

/// GET /transaction/{txid}
pub async fn get_transaction(State(state): State<ApiState>, Path(txid): Path<String>) -> ApiResult<TransactionResponse> {
    let view = state
        .query
        .get_transaction(&txid)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found(format!("transaction {txid} not found")))?;

    Ok(Json(TransactionResponse {
        txid: view.record.txid,
        block_hash: view.record.block_hash,
        block_height: view.record.block_height,
        index_in_block: view.record.index_in_block,
        timestamp: view.record.timestamp,
        size: view.record.size,
        locktime: view.record.locktime,
        inputs: view.inputs.into_iter().map(UtxoEntry::from).collect(),
        outputs: view.outputs.into_iter().map(UtxoEntry::from).collect(),
    }))
}

/// GET /token/{ref}
pub async fn get_token(State(state): State<ApiState>, Path(ref_): Path<String>) -> ApiResult<TokenResponse> {
    if let Some(cached) = state.cache.get_token(&ref_).await {
        return Ok(Json(TokenResponse::from(cached)));
    }

    let token = state
        .query
        .get_token(&ref_)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found(format!("token {ref_} not found")))?;

    state.cache.put_token(&ref_, token.clone()).await;
    Ok(Json(TokenResponse::from(token)))
}

/// GET /holders/count/{asset}?min_balance
pub async fn count_holders(
    State(state): State<ApiState>,
    Path(asset): Path<String>,
    Query(params): Query<HoldersQuery>,
) -> ApiResult<HoldersCountResponse> {
    let min_balance_raw = params.min_balance.clone().unwrap_or_else(|| "0".to_string());
    let min_balance: Amount = min_balance_raw.parse().map_err(|_| bad_request("invalid min_balance"))?;

    let count = state
        .query
        .count_holders(&asset, min_balance)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(HoldersCountResponse { asset, min_balance: min_balance_raw, count }))
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    match state.storage.get_tip().await {
        Ok(Some(tip)) => Json(HealthResponse {
            status: "ok".to_string(),
            indexed_height: Some(tip.current_height),
            indexed_hash: Some(tip.current_hash),
            is_syncing: tip.is_syncing,
        }),
        Ok(None) => Json(HealthResponse { status: "ok".to_string(), indexed_height: None, indexed_hash: None, is_syncing: false }),
        Err(e) => Json(HealthResponse {
            status: format!("error: {e}"),
            indexed_height: None,
            indexed_hash: None,
            is_syncing: false,
        }),
    }
}
