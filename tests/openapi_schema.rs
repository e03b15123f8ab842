use serde_json::Value;

fn schema_properties<'a>(doc: &'a Value, name: &str) -> &'a serde_json::Map<String, Value> {
    doc.get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(|s| s.get(name))
        .and_then(|t| t.get("properties"))
        .and_then(Value::as_object)
        .unwrap_or_else(|| panic!("components.schemas.{name}.properties must exist"))
}

#[test]
fn openapi_describes_audit_records() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = request_desk::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let props = schema_properties(&v, "AuditRecord");
    let keys = [
        "id",
        "timestamp",
        "actor_id",
        "action",
        "entity_type",
        "entity_id",
        "details",
        "reason",
        "sensitive",
        "outcome",
        "digest",
    ];
    for k in &keys {
        assert!(props.contains_key(*k), "OpenAPI AuditRecord schema missing '{}'", k);
    }

    let stats = schema_properties(&v, "ActivityStats");
    for k in ["window_days", "since", "total", "by_action"] {
        assert!(stats.contains_key(k), "OpenAPI ActivityStats schema missing '{}'", k);
    }

    Ok(())
}

#[test]
fn openapi_lists_audit_routes_and_bearer_auth() -> anyhow::Result<()> {
    let doc = request_desk::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let paths = v.get("paths").and_then(Value::as_object).expect("paths must exist");
    for path in [
        "/audit-logs",
        "/audit-logs/entity/{entity_type}/{entity_id}",
        "/audit-logs/stats",
        "/audit-logs/my-activity",
        "/audit-logs/my-stats",
        "/audit-logs/cleanup",
        "/audit-logs/export",
        "/requests",
        "/requests/{id}",
    ] {
        assert!(paths.contains_key(path), "OpenAPI missing path '{}'", path);
    }

    assert!(v.pointer("/components/securitySchemes/bearerAuth").is_some());
    assert!(v
        .get("servers")
        .and_then(Value::as_array)
        .is_some_and(|servers| servers.iter().any(|s| s["url"] == "http://localhost:8000")));

    Ok(())
}
