//! Container build templates
//!
//! Three fixed Dockerfiles cover the framework families: a Node image that
//! builds and serves the project, a Python image that runs the detected app
//! module, and an nginx image for static sites (also the fallback for
//! anything unrecognized). Every template runs as a non-root user where the
//! base image allows it.

use vitrine_spec::{Framework, TemplateFamily};

/// Dockerfile for the framework's template family
pub fn dockerfile_for(framework: Framework) -> &'static str {
    match framework.family() {
        TemplateFamily::Node => NODE_DOCKERFILE,
        TemplateFamily::Python => PYTHON_DOCKERFILE,
        TemplateFamily::Static => STATIC_DOCKERFILE,
    }
}

const NODE_DOCKERFILE: &str = r#"# vitrine preview container - Node.js
FROM node:20-slim

RUN groupadd -r sandbox && useradd -r -g sandbox sandbox

# Static file server fallback for built output
RUN npm install -g serve@14 && npm cache clean --force

WORKDIR /app

COPY --chown=sandbox:sandbox . .

RUN if [ -f package.json ]; then \
      npm install --production 2>/dev/null || true; \
    fi

RUN if [ -f package.json ] && grep -q '"build"' package.json; then \
      npm run build 2>/dev/null || true; \
    fi

USER sandbox

EXPOSE 3000

CMD if [ -d "dist" ]; then \
      serve -s dist -l 3000; \
    elif [ -d "build" ]; then \
      serve -s build -l 3000; \
    elif [ -d "public" ]; then \
      serve -s public -l 3000; \
    else \
      serve -s . -l 3000; \
    fi
"#;

const PYTHON_DOCKERFILE: &str = r#"# vitrine preview container - Python
FROM python:3.12-slim

RUN groupadd -r sandbox && useradd -r -g sandbox sandbox

WORKDIR /app

COPY --chown=sandbox:sandbox . .

RUN if [ -f requirements.txt ]; then \
      pip install --no-cache-dir -r requirements.txt 2>/dev/null || true; \
    fi

USER sandbox

EXPOSE 5000

CMD if [ -f "app.py" ]; then \
      python app.py; \
    elif [ -f "main.py" ]; then \
      python main.py; \
    elif [ -f "manage.py" ]; then \
      python manage.py runserver 0.0.0.0:5000; \
    else \
      python -m http.server 5000; \
    fi
"#;

const STATIC_DOCKERFILE: &str = r#"# vitrine preview container - static
FROM nginx:alpine

# SPA-friendly config: unknown paths fall back to index.html
RUN printf 'server {\n\
    listen 80;\n\
    server_name localhost;\n\
    root /usr/share/nginx/html;\n\
    index index.html;\n\
\n\
    location / {\n\
        try_files $uri $uri/ /index.html;\n\
    }\n\
\n\
    location ~* \.(js|css|png|jpg|jpeg|gif|ico|svg|woff|woff2)$ {\n\
        expires 1y;\n\
        add_header Cache-Control "public, immutable";\n\
    }\n\
\n\
    gzip on;\n\
    gzip_types text/plain text/css application/json application/javascript text/xml application/xml;\n\
}\n' > /etc/nginx/conf.d/default.conf

COPY . /usr/share/nginx/html/

EXPOSE 80
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_frameworks_get_node_template() {
        for framework in [
            Framework::React,
            Framework::Vue,
            Framework::Svelte,
            Framework::Next,
            Framework::Nuxt,
        ] {
            let dockerfile = dockerfile_for(framework);
            assert!(dockerfile.contains("FROM node:20-slim"));
            assert!(dockerfile.contains("EXPOSE 3000"));
        }
    }

    #[test]
    fn test_python_frameworks_get_python_template() {
        for framework in [Framework::Flask, Framework::Django, Framework::FastApi] {
            let dockerfile = dockerfile_for(framework);
            assert!(dockerfile.contains("FROM python:3.12-slim"));
            assert!(dockerfile.contains("EXPOSE 5000"));
        }
    }

    #[test]
    fn test_static_fallback_template() {
        let dockerfile = dockerfile_for(Framework::Static);
        assert!(dockerfile.contains("FROM nginx:alpine"));
        assert!(dockerfile.contains("EXPOSE 80"));
        assert!(dockerfile.contains("try_files"));
    }

    #[test]
    fn test_templates_drop_root_where_possible() {
        assert!(dockerfile_for(Framework::React).contains("USER sandbox"));
        assert!(dockerfile_for(Framework::Flask).contains("USER sandbox"));
    }
}
