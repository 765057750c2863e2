use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Document served for `/`.
pub const ENTRY_DOCUMENT: &str = "vnc.html";

/// Serves one file from the bundled client directory.
///
/// `root` must already be canonicalized. `raw_path` is the percent-encoded URL
/// path as received. The resolved file must stay within `root` after decoding
/// and resolving `.`/`..`/symlinks; anything that escapes is answered with
/// Forbidden, never with file contents.
pub async fn serve(root: &Path, raw_path: &str) -> Response {
    let Ok(decoded) = urlencoding::decode(raw_path) else {
        return status_response(StatusCode::BAD_REQUEST);
    };

    let relative = match relative_candidate(&decoded) {
        Ok(relative) => relative,
        Err(status) => {
            warn!(path = raw_path, status = %status, "Rejected static path");
            return status_response(status);
        }
    };

    let resolved = match tokio::fs::canonicalize(root.join(&relative)).await {
        Ok(resolved) => resolved,
        Err(_) => return status_response(StatusCode::NOT_FOUND),
    };
    if !resolved.starts_with(root) {
        warn!(path = raw_path, "Static path resolved outside the asset root");
        return status_response(StatusCode::FORBIDDEN);
    }

    // Directories and unreadable entries both fall out as Not Found.
    match tokio::fs::read(&resolved).await {
        Ok(body) => {
            let mime = mime_guess::from_path(&resolved).first_or_octet_stream();
            debug!(path = raw_path, bytes = body.len(), "Serving static file");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.to_string())],
                body,
            )
                .into_response()
        }
        Err(_) => status_response(StatusCode::NOT_FOUND),
    }
}

/// Maps a decoded URL path to a relative path under the asset root.
///
/// Rejects paths that cannot be expressed relative to the root with Bad
/// Request, and any `..` segment with Forbidden.
fn relative_candidate(decoded: &str) -> Result<PathBuf, StatusCode> {
    let path = match decoded {
        "" | "/" => ENTRY_DOCUMENT,
        other => other.strip_prefix('/').ok_or(StatusCode::BAD_REQUEST)?,
    };

    let relative = PathBuf::from(path);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(StatusCode::FORBIDDEN),
            Component::RootDir | Component::Prefix(_) => return Err(StatusCode::BAD_REQUEST),
        }
    }
    Ok(relative)
}

fn status_response(status: StatusCode) -> Response {
    let body = format!(
        "{} {}\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    (status, [(header::CONTENT_TYPE, "text/plain".to_string())], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::fs;
    use tempfile::TempDir;

    /// Asset root with an entry document and a nested file, plus a secret
    /// outside the root that traversal attempts aim for.
    fn asset_fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("novnc");
        fs::create_dir_all(root.join("core")).unwrap();
        fs::write(root.join(ENTRY_DOCUMENT), b"<html>viewer</html>").unwrap();
        fs::write(root.join("core/rfb.js"), b"export default class RFB {}").unwrap();
        fs::write(dir.path().join("secret.txt"), b"credentials").unwrap();
        let canonical = root.canonicalize().unwrap();
        (dir, canonical)
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn serves_nested_file_with_mime_type() {
        let (_dir, root) = asset_fixture();
        let response = serve(&root, "/core/rfb.js").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.contains("javascript"), "{content_type}");
        assert_eq!(body_bytes(response).await, b"export default class RFB {}");
    }

    #[tokio::test]
    async fn root_aliases_to_entry_document() {
        let (_dir, root) = asset_fixture();
        let by_alias = serve(&root, "/").await;
        let by_name = serve(&root, "/vnc.html").await;
        assert_eq!(by_alias.status(), StatusCode::OK);
        assert_eq!(by_name.status(), StatusCode::OK);
        assert_eq!(body_bytes(by_alias).await, body_bytes(by_name).await);
    }

    #[tokio::test]
    async fn rejects_raw_traversal() {
        let (_dir, root) = asset_fixture();
        let response = serve(&root, "/../secret.txt").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn rejects_percent_encoded_traversal() {
        let (_dir, root) = asset_fixture();
        for path in ["/%2e%2e/secret.txt", "/core/%2e%2e/%2e%2e/secret.txt"] {
            let response = serve(&root, path).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejects_symlink_escape() {
        let (dir, root) = asset_fixture();
        std::os::unix::fs::symlink(dir.path().join("secret.txt"), root.join("leak")).unwrap();
        let response = serve(&root, "/leak").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, root) = asset_fixture();
        let response = serve(&root, "/nope.js").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn directory_is_not_found() {
        let (_dir, root) = asset_fixture();
        let response = serve(&root, "/core").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn double_slash_prefix_is_bad_request() {
        let (_dir, root) = asset_fixture();
        let response = serve(&root, "//etc/passwd").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
