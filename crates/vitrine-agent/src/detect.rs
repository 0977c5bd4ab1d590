//! Backend and framework detection
//!
//! Detection inspects the project's manifest files in a fixed priority
//! order (Node manifest, Python requirements, Python project file, Go
//! module, Rust package) and returns on the first match with a best-guess
//! framework, entry file, and launch command.

use crate::store::ProjectFile;
use crate::workdir::normalize_project_path;
use serde::Serialize;
use std::collections::HashMap;
use vitrine_spec::{Framework, ServerType};

/// Result of backend auto-detection
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendDetection {
    pub has_backend: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_type: Option<ServerType>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub entry_file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub framework: String,
}

const NODE_ENTRIES: &[&str] = &[
    "server.js",
    "index.js",
    "app.js",
    "main.js",
    "src/server.js",
    "src/index.js",
    "src/app.js",
    "src/main.js",
    "server/index.js",
    "server/app.js",
    "dist/index.js",
    "dist/server.js",
    // TypeScript sources come last; `npm run start` handles compilation
    "server.ts",
    "index.ts",
    "app.ts",
    "main.ts",
    "src/server.ts",
    "src/index.ts",
    "src/app.ts",
    "src/main.ts",
];

const PYTHON_ENTRIES: &[&str] = &[
    "app.py",
    "main.py",
    "server.py",
    "wsgi.py",
    "run.py",
    "src/app.py",
    "src/main.py",
    "src/server.py",
    "application.py",
    "api.py",
];

const GO_ENTRIES: &[&str] = &[
    "main.go",
    "cmd/main.go",
    "cmd/server/main.go",
    "server/main.go",
    "cmd/api/main.go",
];

/// Index a snapshot by normalized path for constant-time lookups
fn file_index(files: &[ProjectFile]) -> HashMap<String, &str> {
    let mut index = HashMap::new();
    for file in files {
        index.insert(file.path.clone(), file.content.as_str());
        if let Some(normalized) = normalize_project_path(&file.path) {
            index.entry(normalized).or_insert(file.content.as_str());
        }
    }
    index
}

fn first_existing(index: &HashMap<String, &str>, candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|entry| index.contains_key(**entry))
        .map(|entry| entry.to_string())
        .unwrap_or_default()
}

/// Detect a project's backend server from its manifest files
pub fn detect_backend(files: &[ProjectFile]) -> BackendDetection {
    let index = file_index(files);

    // Node: a package.json with a start/serve script
    if let Some(content) = index.get("package.json") {
        if content.contains("\"start\"") || content.contains("\"serve\"") {
            let framework = if content.contains("\"express\"") {
                "express"
            } else if content.contains("\"fastify\"") {
                "fastify"
            } else if content.contains("\"koa\"") {
                "koa"
            } else if content.contains("\"hapi\"") {
                "hapi"
            } else if content.contains("\"nest\"") || content.contains("\"@nestjs\"") {
                "nestjs"
            } else {
                ""
            };

            return BackendDetection {
                has_backend: true,
                server_type: Some(ServerType::Node),
                entry_file: first_existing(&index, NODE_ENTRIES),
                // `npm run start` handles TypeScript toolchains transparently
                command: "npm".to_string(),
                framework: framework.to_string(),
            };
        }
    }

    // Python: requirements.txt naming a known web stack
    if let Some(content) = index.get("requirements.txt") {
        let lower = content.to_lowercase();
        if lower.contains("flask")
            || lower.contains("django")
            || lower.contains("fastapi")
            || lower.contains("uvicorn")
        {
            let (framework, command) = if lower.contains("flask") {
                ("flask", "python")
            } else if lower.contains("django") {
                ("django", "python")
            } else if lower.contains("fastapi") {
                ("fastapi", "uvicorn")
            } else {
                ("", "python")
            };

            return BackendDetection {
                has_backend: true,
                server_type: Some(ServerType::Python),
                entry_file: first_existing(&index, PYTHON_ENTRIES),
                command: command.to_string(),
                framework: framework.to_string(),
            };
        }
    }

    // Modern Python: pyproject.toml
    if let Some(content) = index.get("pyproject.toml") {
        let lower = content.to_lowercase();
        if lower.contains("flask") || lower.contains("django") || lower.contains("fastapi") {
            return BackendDetection {
                has_backend: true,
                server_type: Some(ServerType::Python),
                entry_file: first_existing(&index, &PYTHON_ENTRIES[..7]),
                command: "python".to_string(),
                framework: String::new(),
            };
        }
    }

    // Go
    if let Some(content) = index.get("go.mod") {
        let framework = if content.contains("gin-gonic/gin") {
            "gin"
        } else if content.contains("gorilla/mux") {
            "gorilla"
        } else if content.contains("labstack/echo") {
            "echo"
        } else if content.contains("go-chi/chi") {
            "chi"
        } else if content.contains("gofiber/fiber") {
            "fiber"
        } else {
            ""
        };

        return BackendDetection {
            has_backend: true,
            server_type: Some(ServerType::Go),
            entry_file: first_existing(&index, GO_ENTRIES),
            command: "go run".to_string(),
            framework: framework.to_string(),
        };
    }

    // Rust
    if let Some(content) = index.get("Cargo.toml") {
        let framework = if content.contains("actix-web") {
            "actix"
        } else if content.contains("rocket") {
            "rocket"
        } else if content.contains("axum") {
            "axum"
        } else if content.contains("warp") {
            "warp"
        } else {
            ""
        };

        return BackendDetection {
            has_backend: true,
            server_type: Some(ServerType::Rust),
            entry_file: "src/main.rs".to_string(),
            command: "cargo run".to_string(),
            framework: framework.to_string(),
        };
    }

    BackendDetection::default()
}

/// Infer the container build framework from project files. Unrecognized
/// projects fall back to the static template.
pub fn infer_framework(files: &[ProjectFile]) -> Framework {
    for file in files {
        if file.path == "package.json" {
            let content = &file.content;
            if content.contains("\"next\"") {
                return Framework::Next;
            }
            if content.contains("\"nuxt\"") {
                return Framework::Nuxt;
            }
            if content.contains("\"react\"") {
                return Framework::React;
            }
            if content.contains("\"vue\"") {
                return Framework::Vue;
            }
            if content.contains("\"svelte\"") {
                return Framework::Svelte;
            }
        }
        if file.path == "requirements.txt" {
            let content = &file.content;
            if content.contains("flask") {
                return Framework::Flask;
            }
            if content.contains("django") {
                return Framework::Django;
            }
            if content.contains("fastapi") {
                return Framework::FastApi;
            }
        }
    }
    Framework::Static
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ProjectFile;

    fn files(entries: &[(&str, &str)]) -> Vec<ProjectFile> {
        entries
            .iter()
            .map(|(path, content)| ProjectFile::new(*path, *content))
            .collect()
    }

    #[test]
    fn test_detect_express_backend() {
        let detection = detect_backend(&files(&[
            (
                "package.json",
                r#"{"scripts":{"start":"node server.js"},"dependencies":{"express":"^4"}}"#,
            ),
            ("server.js", "require('express')"),
        ]));

        assert!(detection.has_backend);
        assert_eq!(detection.server_type, Some(ServerType::Node));
        assert_eq!(detection.command, "npm");
        assert_eq!(detection.framework, "express");
        assert_eq!(detection.entry_file, "server.js");
    }

    #[test]
    fn test_node_without_start_script_is_not_a_backend() {
        let detection = detect_backend(&files(&[(
            "package.json",
            r#"{"dependencies":{"react":"^18"}}"#,
        )]));
        assert!(!detection.has_backend);
    }

    #[test]
    fn test_typescript_entry_found_after_js_candidates() {
        let detection = detect_backend(&files(&[
            ("package.json", r#"{"scripts":{"start":"ts-node src/server.ts"}}"#),
            ("src/server.ts", "import express from 'express'"),
        ]));
        assert_eq!(detection.entry_file, "src/server.ts");
    }

    #[test]
    fn test_detect_fastapi_switches_to_uvicorn() {
        let detection = detect_backend(&files(&[
            ("requirements.txt", "fastapi==0.110\nuvicorn"),
            ("main.py", "app = FastAPI()"),
        ]));

        assert!(detection.has_backend);
        assert_eq!(detection.server_type, Some(ServerType::Python));
        assert_eq!(detection.command, "uvicorn");
        assert_eq!(detection.framework, "fastapi");
        assert_eq!(detection.entry_file, "main.py");
    }

    #[test]
    fn test_node_takes_priority_over_python() {
        let detection = detect_backend(&files(&[
            ("package.json", r#"{"scripts":{"start":"node app.js"}}"#),
            ("requirements.txt", "flask"),
            ("app.js", ""),
        ]));
        assert_eq!(detection.server_type, Some(ServerType::Node));
    }

    #[test]
    fn test_detect_go_with_framework() {
        let detection = detect_backend(&files(&[
            ("go.mod", "module example.com/app\nrequire github.com/gin-gonic/gin v1.9.0"),
            ("main.go", "package main"),
        ]));

        assert_eq!(detection.server_type, Some(ServerType::Go));
        assert_eq!(detection.command, "go run");
        assert_eq!(detection.framework, "gin");
        assert_eq!(detection.entry_file, "main.go");
    }

    #[test]
    fn test_detect_rust_axum() {
        let detection = detect_backend(&files(&[(
            "Cargo.toml",
            "[dependencies]\naxum = \"0.8\"",
        )]));

        assert_eq!(detection.server_type, Some(ServerType::Rust));
        assert_eq!(detection.command, "cargo run");
        assert_eq!(detection.framework, "axum");
        assert_eq!(detection.entry_file, "src/main.rs");
    }

    #[test]
    fn test_static_project_has_no_backend() {
        let detection = detect_backend(&files(&[("index.html", "<html></html>")]));
        assert!(!detection.has_backend);
    }

    #[test]
    fn test_detection_handles_prefixed_paths() {
        // Paths stored with a leading slash still resolve after normalization
        let detection = detect_backend(&files(&[
            ("/package.json", r#"{"scripts":{"start":"node index.js"}}"#),
            ("/index.js", ""),
        ]));
        assert!(detection.has_backend);
        assert_eq!(detection.entry_file, "index.js");
    }

    #[test]
    fn test_infer_framework_families() {
        assert_eq!(
            infer_framework(&files(&[("package.json", r#"{"dependencies":{"react":"^18"}}"#)])),
            Framework::React
        );
        assert_eq!(
            infer_framework(&files(&[("package.json", r#"{"dependencies":{"next":"14"}}"#)])),
            Framework::Next
        );
        assert_eq!(
            infer_framework(&files(&[("requirements.txt", "flask==3.0")])),
            Framework::Flask
        );
        assert_eq!(
            infer_framework(&files(&[("index.html", "<html></html>")])),
            Framework::Static
        );
    }
}
