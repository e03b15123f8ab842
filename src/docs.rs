use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::audit::{ActivityStats, AuditOutcome, AuditPage, AuditRecord, ExportFormat};
use crate::authz::AuthContextSummary;
use crate::models::request::{RequestStatus, SongRequest, SongRequestCreate, SongRequestUpdate};
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::me,
		routes::requests::list_requests,
		routes::requests::create_request,
		routes::requests::update_request,
		routes::requests::delete_request,
		routes::audit::list_audit_logs,
		routes::audit::entity_history,
		routes::audit::activity_stats,
		routes::audit::my_activity,
		routes::audit::my_stats,
		routes::audit::cleanup,
		routes::audit::export
	),
	components(
		schemas(
			routes::health::HealthResponse,
			routes::audit::CleanupResponse,
			AuthContextSummary,
			AuditRecord,
			AuditOutcome,
			AuditPage,
			ActivityStats,
			ExportFormat,
			SongRequest,
			SongRequestCreate,
			SongRequestUpdate,
			RequestStatus
		)
	),
	tags(
		(name = "Health", description = "Liveness"),
		(name = "Auth", description = "Caller identity"),
		(name = "Requests", description = "Song requests"),
		(name = "Audit", description = "Audit trail queries and administration")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_global_security(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn object_entry<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
	parent
		.as_object_mut()?
		.entry(key.to_string())
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
}

fn ensure_security_components(doc: &mut Value) {
	let Some(components) = object_entry(doc, "components") else { return; };
	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));

	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"bearerAuth".to_string(),
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			}),
		);
	}
}

fn ensure_global_security(doc: &mut Value) {
	if let Some(root) = doc.as_object_mut() {
		root.entry("security")
			.or_insert_with(|| json!([{ "bearerAuth": [] }]));
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
