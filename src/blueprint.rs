//! Target project blueprint
//!
//! A running target can describe itself at an introspection endpoint. Two JSON
//! shapes are understood: grouped `api_routes` (with optional `test_credentials`
//! and `project_info`) and a flat `routes` list. Anything else is kept raw so it
//! can still be shown to the model.

use serde::Serialize;
use serde_json::Value;

/// A group of endpoints sharing a URL prefix, usually one source file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteGroup {
    pub name: String,
    pub prefix: String,
    pub file: Option<String>,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Credential {
    pub role: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectInfo {
    pub frontend_url: Option<String>,
    pub backend_url: Option<String>,
}

/// One entry of a flat route list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub methods: Vec<String>,
    pub path: String,
}

/// Fetched fresh for every analysis, never cached
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Blueprint {
    pub groups: Vec<RouteGroup>,
    pub credentials: Vec<Credential>,
    pub project_info: Option<ProjectInfo>,
    pub routes: Vec<Route>,
    /// Unrecognized payload, kept verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    /// Introspection path that answered
    pub source: Option<String>,
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

impl Blueprint {
    /// Parse whatever the target returned. Never fails: unknown shapes land in `raw`.
    pub fn from_json(data: &Value) -> Self {
        let mut blueprint = Blueprint::default();

        let Some(obj) = data.as_object() else {
            if !data.is_null() {
                blueprint.raw = Some(data.clone());
            }
            return blueprint;
        };

        if let Some(groups) = obj.get("api_routes").and_then(Value::as_object) {
            for (name, info) in groups {
                let endpoints = info
                    .get("endpoints")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .map(|e| match e.as_str() {
                                Some(s) => s.to_string(),
                                None => e.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                blueprint.groups.push(RouteGroup {
                    name: name.clone(),
                    prefix: str_field(info, "prefix").unwrap_or_default(),
                    file: str_field(info, "file").filter(|f| !f.is_empty()),
                    endpoints,
                });
            }
        }

        match obj.get("test_credentials") {
            Some(Value::Object(map)) => {
                for (role, info) in map {
                    blueprint.credentials.push(parse_credential(Some(role), info));
                }
            }
            Some(Value::Array(list)) => {
                for info in list {
                    blueprint.credentials.push(parse_credential(None, info));
                }
            }
            _ => {}
        }

        if let Some(info) = obj.get("project_info").filter(|v| v.is_object()) {
            blueprint.project_info = Some(ProjectInfo {
                frontend_url: str_field(info, "frontend_url"),
                backend_url: str_field(info, "backend_url"),
            });
        }

        if let Some(routes) = obj.get("routes").and_then(Value::as_array) {
            for route in routes {
                let methods = match route.get("methods") {
                    Some(Value::Array(m)) => m.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                    Some(Value::String(m)) => vec![m.clone()],
                    _ => vec!["GET".to_string()],
                };
                let path = str_field(route, "path")
                    .or_else(|| str_field(route, "endpoint"))
                    .unwrap_or_else(|| "unknown".to_string());
                blueprint.routes.push(Route { methods, path });
            }
        }

        if !obj.contains_key("api_routes")
            && !obj.contains_key("routes")
            && blueprint.project_info.is_none()
            && blueprint.credentials.is_empty()
        {
            blueprint.raw = Some(data.clone());
        }

        blueprint
    }

    /// True when there is nothing worth putting in a prompt
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
            && self.credentials.is_empty()
            && self.project_info.is_none()
            && self.routes.is_empty()
            && self.raw.is_none()
    }

    pub fn endpoint_count(&self) -> usize {
        self.groups.iter().map(|g| g.endpoints.len()).sum::<usize>() + self.routes.len()
    }
}

fn parse_credential(role: Option<&String>, info: &Value) -> Credential {
    match info {
        Value::Object(_) => Credential {
            role: role
                .cloned()
                .or_else(|| str_field(info, "role"))
                .unwrap_or_else(|| "user".to_string()),
            email: str_field(info, "email").unwrap_or_default(),
            password: str_field(info, "password").unwrap_or_default(),
        },
        other => Credential {
            role: role.cloned().unwrap_or_else(|| "user".to_string()),
            email: other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string()),
            password: String::new(),
        },
    }
}
