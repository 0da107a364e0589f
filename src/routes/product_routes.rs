// src/routes/product_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{post, put},
};
use serde::Deserialize;

use crate::{
    authz::{self, Operation, Ownership},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, NewProduct, Product, required_text},
    routes::collection,
    store::{Resource, ResourceKind},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_link: String,
    #[serde(default)]
    pub product_link: String,
    #[serde(default)]
    pub skin_type: String,
}

impl ProductRequest {
    fn into_draft(self) -> Result<NewProduct, ApiError> {
        Ok(NewProduct {
            name: required_text("name", &self.name)?,
            brand: self.brand.trim().to_string(),
            description: self.description.trim().to_string(),
            image_link: self.image_link.trim().to_string(),
            product_link: self.product_link.trim().to_string(),
            skin_type: self.skin_type.trim().to_string(),
        })
    }
}

pub fn router() -> Router<AppState> {
    collection::routes::<Product>("/products")
        .route("/products", post(create_product))
        .route("/products/{id}", put(update_product))
}

pub async fn create_product(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ProductRequest>,
) -> Result<Json<Product>, ApiError> {
    authz::authorize(&auth, ResourceKind::Product, Operation::Create, Ownership::Unknown)?;

    let product = state.stores.products.create(req.into_draft()?).await?;

    tracing::info!(product_id = product.product_id, by = auth.user_id, "product created");
    Ok(Json(product))
}

pub async fn update_product(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(product_id): Path<i64>,
    Json(req): Json<ProductRequest>,
) -> Result<Json<Product>, ApiError> {
    authz::authorize(&auth, ResourceKind::Product, Operation::Update, Ownership::Unknown)?;

    let next = Product::with_id(product_id, req.into_draft()?);
    let product = state
        .stores
        .products
        .update(&next)
        .await?
        .ok_or_else(|| ApiError::not_found(ResourceKind::Product))?;

    tracing::info!(product_id, by = auth.user_id, "product updated");
    Ok(Json(product))
}
