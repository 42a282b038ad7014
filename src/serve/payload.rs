//! Purpose: Normalize inbound request bodies into one entry document.
//! Exports: `read_document`, `UNSUPPORTED_MEDIA`.
//! Role: Transport adapter in front of the field codec (JSON vs multipart).
//! Invariants: Both encodings of the same logical document decode identically.
//! Invariants: Multipart `data` carries the document as JSON text; other text
//! parts named after `json` attributes are decoded as per-field JSON text.
//! Notes: File parts are rejected; uploads are not part of this surface.

use axum::body::to_bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;

use fieldstore::api::{
    AttributeType, ContentType, Error, ErrorKind, FieldCodec, Inbound, InboundDocument,
    structured_document,
};

pub(crate) const UNSUPPORTED_MEDIA: &str = "unsupported media type";

enum Encoding {
    Json,
    Multipart,
}

pub(crate) async fn read_document(
    request: Request,
    codec: FieldCodec,
    content_type: &ContentType,
    max_body_bytes: usize,
) -> Result<InboundDocument, Error> {
    match encoding_of(&request)? {
        Encoding::Json => read_json(request, codec, max_body_bytes).await,
        Encoding::Multipart => read_multipart(request, codec, content_type).await,
    }
}

fn encoding_of(request: &Request) -> Result<Encoding, Error> {
    let header = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let mime = header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/json" => Ok(Encoding::Json),
        "multipart/form-data" => Ok(Encoding::Multipart),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("{UNSUPPORTED_MEDIA}: {}", display_mime(&mime)))
            .with_hint("Send application/json, or multipart/form-data with a `data` part.")),
    }
}

fn display_mime(mime: &str) -> &str {
    if mime.is_empty() { "(none)" } else { mime }
}

async fn read_json(
    request: Request,
    codec: FieldCodec,
    max_body_bytes: usize,
) -> Result<InboundDocument, Error> {
    let bytes = to_bytes(request.into_body(), max_body_bytes)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("request body is unreadable or too large")
                .with_source(err)
        })?;
    let text = std::str::from_utf8(&bytes).map_err(|err| {
        Error::new(ErrorKind::MalformedValue)
            .with_message("request body is not valid UTF-8")
            .with_source(err)
    })?;
    let document = codec.decode_document(text)?;
    Ok(structured_document(document))
}

async fn read_multipart(
    request: Request,
    codec: FieldCodec,
    content_type: &ContentType,
) -> Result<InboundDocument, Error> {
    let mut multipart = Multipart::from_request(request, &()).await.map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid multipart request")
            .with_source(err)
    })?;

    let mut data: Option<InboundDocument> = None;
    let mut parts = InboundDocument::new();
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("failed to read multipart part")
            .with_source(err)
    })? {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_some() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("file parts are not accepted")
                .with_field(name));
        }
        let text = field.text().await.map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("failed to read multipart part")
                .with_field(name.clone())
                .with_source(err)
        })?;

        if name == "data" {
            if data.is_some() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("multipart body has more than one `data` part"));
            }
            data = Some(structured_document(codec.decode_document(&text)?));
            continue;
        }
        let is_json_attribute = content_type
            .attribute(&name)
            .is_some_and(|attribute| attribute.kind == AttributeType::Json);
        if !is_json_attribute {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("unexpected multipart part")
                .with_collection(&content_type.name)
                .with_field(name)
                .with_hint("Put attributes in the `data` part as a JSON object."));
        }
        if parts.contains_key(&name) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("multipart body repeats an attribute part")
                .with_collection(&content_type.name)
                .with_field(name));
        }
        parts.insert(name, Inbound::Text(text));
    }

    if data.is_none() && parts.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("multipart body needs a `data` part or at least one attribute part")
            .with_collection(&content_type.name)
            .with_hint("Send the entry as JSON text in a `data` part."));
    }
    let mut document = data.unwrap_or_default();
    for (name, inbound) in parts {
        if document.contains_key(&name) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("attribute supplied both in `data` and as its own part")
                .with_collection(&content_type.name)
                .with_field(name));
        }
        document.insert(name, inbound);
    }
    Ok(document)
}
