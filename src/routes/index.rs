use super::ApiError;
use crate::{server::SharedState, storage::ImageRef};
use axum::{
    extract::State,
    response::{Html, IntoResponse, Json, Response},
};
use tracing::instrument;

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn render_index(bucket: &str, images: &[ImageRef]) -> String {
    let mut items = String::new();
    for image in images {
        let url = image.to_string();
        items.push_str(&format!(
            r#"<li><form method="post" action="/analyze?image_url={}"><code>{}</code> <button type="submit">Analyze</button></form></li>"#,
            urlencoding::encode(&url),
            escape_html(&url),
        ));
    }
    if images.is_empty() {
        items.push_str("<li>No images in the bucket.</li>");
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Garden Genie</title></head>
<body>
<h1>Garden Genie</h1>
<h2>Upload a plant photo</h2>
<form method="post" action="/analyze" enctype="multipart/form-data">
<input type="file" name="image" accept="image/*"> <button type="submit">Analyze</button>
</form>
<h2>Images in {}</h2>
<ul>
{}
</ul>
</body>
</html>
"#,
        escape_html(bucket),
        items
    )
}

#[instrument(skip(state))]
pub async fn index(State(state): State<SharedState>) -> Result<Response, ApiError> {
    state.metrics.record_request("index");

    let images = state.analyzer.list_images().await?;
    Ok(Html(render_index(state.analyzer.bucket(), &images)).into_response())
}

#[instrument(skip(state))]
pub async fn list_images(State(state): State<SharedState>) -> Result<Response, ApiError> {
    state.metrics.record_request("images");

    let images = state.analyzer.list_images().await?;
    let urls: Vec<String> = images.iter().map(ImageRef::to_string).collect();
    Ok(Json(urls).into_response())
}
