//! OpenAPI 3.0 description of the HTTP surface.

use serde_json::{json, Map, Value};

use crate::actions::{payload_schema, ActionKind, DEFAULT_REF};
use crate::dispatch::AUTO_BRANCH_PREFIX;

/// Build the document. Payload schemas come from the action table so the two
/// cannot drift.
#[must_use]
pub fn document() -> Value {
    let mut schemas = Map::new();
    schemas.insert("Error".to_string(), error_schema());
    schemas.insert(
        "ActionEnum".to_string(),
        json!({
            "type": "string",
            "enum": ActionKind::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
        }),
    );
    schemas.insert(
        "ExecuteRequest".to_string(),
        json!({
            "type": "object",
            "required": ["agentId", "repo", "action", "payload"],
            "properties": {
                "agentId": { "type": "string", "minLength": 1 },
                "repo": { "type": "string", "pattern": "^[^/]+/[^/]+$" },
                "action": { "$ref": "#/components/schemas/ActionEnum" },
                "payload": { "$ref": "#/components/schemas/ActionPayload" },
            },
        }),
    );

    let mut payload_refs = Vec::with_capacity(ActionKind::ALL.len());
    for kind in ActionKind::ALL {
        let name = format!("P_{kind}");
        payload_refs.push(json!({ "$ref": format!("#/components/schemas/{name}") }));
        schemas.insert(name, payload_schema(kind));
    }
    schemas.insert("ActionPayload".to_string(), json!({ "oneOf": payload_refs }));

    let error_ref = json!({ "$ref": "#/components/responses/Error" });

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Agent Repository Gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Signed gateway for agent operations on allowlisted GitHub repositories.",
        },
        "paths": {
            "/health": {
                "get": {
                    "summary": "Health check",
                    "responses": {
                        "200": {
                            "description": "OK",
                            "content": { "application/json": { "schema": {
                                "type": "object",
                                "properties": { "status": { "type": "string", "enum": ["healthy"] } },
                                "required": ["status"],
                            } } },
                        },
                    },
                },
            },
            "/agent/execute": { "post": execute_operation(&error_ref) },
            "/github/webhook": {
                "post": {
                    "summary": "GitHub webhook receiver",
                    "operationId": "receiveGithubWebhook",
                    "security": [{ "GithubWebhookAuth": [] }],
                    "responses": {
                        "200": {
                            "description": "OK",
                            "content": { "application/json": { "schema": {
                                "type": "object",
                                "properties": { "ok": { "type": "boolean" } },
                                "required": ["ok"],
                            } } },
                        },
                        "401": error_ref,
                        "500": error_ref,
                    },
                },
            },
        },
        "components": {
            "securitySchemes": {
                "HmacAuth": {
                    "type": "apiKey",
                    "in": "header",
                    "name": "X-Signature",
                    "description": "sha256=<hex> HMAC-SHA256 of the raw body with the shared secret.",
                },
                "BearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" },
                "GithubWebhookAuth": {
                    "type": "apiKey",
                    "in": "header",
                    "name": "X-Hub-Signature-256",
                    "description": "GitHub webhook signature verified with the webhook secret.",
                },
            },
            "responses": {
                "Error": {
                    "description": "Error response",
                    "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Error" } } },
                },
            },
            "schemas": schemas,
        },
    })
}

fn execute_operation(error_ref: &Value) -> Value {
    json!({
        "summary": "Execute a repository action",
        "operationId": "executeAction",
        "security": [{ "HmacAuth": [] }, { "HmacAuth": [], "BearerAuth": [] }],
        "parameters": [
            {
                "name": "Idempotency-Key",
                "in": "header",
                "required": false,
                "schema": { "type": "string" },
            },
            {
                "name": "X-Request-Id",
                "in": "header",
                "required": false,
                "schema": { "type": "string" },
            },
        ],
        "requestBody": {
            "required": true,
            "content": { "application/json": {
                "schema": { "$ref": "#/components/schemas/ExecuteRequest" },
                "examples": {
                    "put_file": {
                        "summary": "Write a file on a generated branch",
                        "value": {
                            "agentId": "agent-1",
                            "repo": "owner/repo",
                            "action": "PUT_FILE",
                            "payload": { "path": "README.md", "content": "Hello" },
                        },
                    },
                    "open_pr": {
                        "summary": "Open a pull request",
                        "value": {
                            "agentId": "agent-1",
                            "repo": "owner/repo",
                            "action": "OPEN_PR",
                            "payload": {
                                "head": format!("{AUTO_BRANCH_PREFIX}abc12345"),
                                "base": DEFAULT_REF,
                                "title": "Agent change",
                            },
                        },
                    },
                },
            } },
        },
        "responses": {
            "200": { "description": "Success", "content": { "application/json": { "schema": {} } } },
            "201": { "description": "Created", "content": { "application/json": { "schema": {} } } },
            "400": error_ref,
            "401": error_ref,
            "403": error_ref,
            "404": error_ref,
            "409": error_ref,
            "422": error_ref,
            "429": error_ref,
            "500": error_ref,
        },
    })
}

fn error_schema() -> Value {
    json!({
        "type": "object",
        "required": ["error"],
        "properties": {
            "error": {
                "type": "object",
                "required": ["code", "message"],
                "properties": {
                    "code": {
                        "type": "string",
                        "enum": [
                            "BAD_REQUEST", "UNAUTHORIZED", "FORBIDDEN", "NOT_FOUND", "CONFLICT",
                            "VALIDATION_FAILED", "RATE_LIMITED", "CONFIG_ERROR", "INTERNAL",
                        ],
                    },
                    "message": { "type": "string" },
                    "details": {},
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_action_has_a_payload_schema() {
        let doc = document();
        let schemas = &doc["components"]["schemas"];
        assert_eq!(schemas["ActionEnum"]["enum"].as_array().unwrap().len(), 10);
        for kind in ActionKind::ALL {
            let schema = &schemas[format!("P_{kind}")];
            assert_eq!(schema["type"], "object", "{kind}");
        }
        assert_eq!(schemas["P_SEARCH_CODE"]["properties"]["q"]["minLength"], 3);
        assert_eq!(schemas["ActionPayload"]["oneOf"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_paths() {
        let doc = document();
        assert_eq!(doc["openapi"], "3.0.3");
        for path in ["/health", "/agent/execute", "/github/webhook"] {
            assert!(doc["paths"].get(path).is_some(), "{path}");
        }
    }
}
