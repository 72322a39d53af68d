//! WebDAV method handlers.
//!
//! Every request outside the health endpoints lands in `dispatch`, which
//! resolves the path and picks a handler by method name. Handlers return
//! `Result<Response, AppError>`; store errors surface through `AppError`.

use crate::{
    dav::{
        self, DESTINATION, LOCK_TOKEN, OVERWRITE,
        collection::{
            Depth, Listing, collection_metadata, is_collection, parent_is_collection,
            remove_tree,
        },
        path::{ResourcePath, child_name, destination_key, href_for},
        props::{
            MultiStatus, http_date, lock_response, propfind_entry, proppatch_response, xml_escape,
        },
        transfer::{TransferMode, transfer_object, transfer_tree},
        xml::{DAV_NAMESPACE, Element, Namespace, NamespaceMode, XmlValue},
    },
    errors::AppError,
    models::object::{CustomMetadata, HttpMetadata, StoredObject},
    services::object_store::{
        ByteRange, Conditional, GetOptions, GetOutcome, ObjectContent, empty_body,
    },
    state::AppState,
};
use axum::{
    body::{self, Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::{fmt::Write as _, io};

/// Largest LOCK / PROPPATCH body read into memory.
const MAX_XML_BODY: usize = 1024 * 1024;
const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Route a request to the handler for its method.
pub async fn dispatch(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let path = ResourcePath::from_uri_path(parts.uri.path());
    let headers = &parts.headers;

    match parts.method.as_str() {
        "OPTIONS" => Ok(options()),
        "GET" => get_resource(&state, &path, headers).await,
        "HEAD" => Ok(without_body(
            get_resource(&state, &path, headers).await.into_response(),
        )),
        "PUT" => put_resource(&state, &path, headers, body).await,
        "DELETE" => delete_resource(&state, &path).await,
        "MKCOL" => make_collection(&state, &path, headers).await,
        "COPY" => transfer(&state, &path, headers, TransferMode::Copy).await,
        "MOVE" => transfer(&state, &path, headers, TransferMode::Move).await,
        "PROPFIND" => propfind(&state, &path, headers).await,
        "PROPPATCH" => proppatch(&path, body).await,
        "LOCK" => lock(&state, &path, body).await,
        "UNLOCK" => unlock(&state, &path, headers).await,
        other => {
            tracing::debug!("unsupported method {}", other);
            Err(AppError::method_not_allowed("Method Not Allowed"))
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn status_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn xml_response(status: StatusCode, xml: String) -> Response {
    let mut response = Response::new(Body::from(xml));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
    response
}

fn without_body(response: Response) -> Response {
    let (parts, _) = response.into_parts();
    Response::from_parts(parts, Body::empty())
}

async fn read_body(body: Body) -> Result<Bytes, AppError> {
    body::to_bytes(body, MAX_XML_BODY)
        .await
        .map_err(|err| AppError::bad_request(format!("unreadable request body: {err}")))
}

/// `OPTIONS`: advertise methods and compliance class.
fn options() -> Response {
    let mut response = status_response(StatusCode::NO_CONTENT);
    let headers = response.headers_mut();
    headers.insert(header::ALLOW, dav::allow_header());
    headers.insert(dav::DAV, HeaderValue::from_static(dav::DAV_CLASS));
    response
}

/// Write the stored metadata of `object` as response headers.
fn set_object_headers(headers: &mut HeaderMap, object: &StoredObject, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    object.http_metadata.write_headers(headers);

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Ok(value) = HeaderValue::from_str(&object.http_etag()) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&http_date(&object.uploaded)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// `GET`: a document's payload, or an HTML index for collection paths.
async fn get_resource(
    state: &AppState,
    path: &ResourcePath,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    if path.trailing_slash || path.is_root() {
        return index_page(state, &path.key).await;
    }

    let options = GetOptions {
        conditional: Conditional::from_headers(headers),
        range: header_str(headers, &header::RANGE).and_then(ByteRange::parse),
    };

    match state.store.get(&path.key, options).await? {
        None => Err(AppError::not_found("Not Found")),
        Some(GetOutcome::NotModified(object)) => {
            let mut response = status_response(StatusCode::NOT_MODIFIED);
            set_object_headers(response.headers_mut(), &object, 0);
            response.headers_mut().remove(header::CONTENT_LENGTH);
            Ok(response)
        }
        Some(GetOutcome::Body(content)) => Ok(object_response(content)),
    }
}

fn object_response(content: ObjectContent) -> Response {
    let ObjectContent {
        object,
        range,
        body,
    } = content;

    let mut response = Response::new(Body::from_stream(body));
    match range {
        Some(range) => {
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            set_object_headers(response.headers_mut(), &object, range.len());
            if let Ok(value) = HeaderValue::from_str(&range.content_range(object.size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        None => set_object_headers(response.headers_mut(), &object, object.size),
    }
    response
}

/// Browser-friendly listing of a collection's immediate children.
async fn index_page(state: &AppState, key: &str) -> Result<Response, AppError> {
    let mut page = String::new();
    if !key.is_empty() {
        page.push_str(r#"<a href="../">..</a><br>"#);
    }

    let mut listing = Listing::children(key);
    while let Some(object) = listing.next_object(state.store.as_ref()).await? {
        let href = href_for(&object.key, is_collection(&object));
        let label = object
            .http_metadata
            .content_disposition
            .as_deref()
            .unwrap_or_else(|| child_name(&object.key));
        let _ = write!(
            page,
            r#"<a href="{}">{}</a><br>"#,
            xml_escape(&href),
            xml_escape(label)
        );
    }

    let mut response = Response::new(Body::from(page));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    Ok(response)
}

/// `PUT`: stream the request body into a document.
async fn put_resource(
    state: &AppState,
    path: &ResourcePath,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    if path.trailing_slash || path.is_root() {
        return Err(AppError::method_not_allowed("Method Not Allowed"));
    }
    let store = state.store.as_ref();
    if !parent_is_collection(store, &path.key).await? {
        return Err(AppError::conflict("Conflict"));
    }
    if store
        .head(&path.key)
        .await?
        .is_some_and(|existing| is_collection(&existing))
    {
        return Err(AppError::method_not_allowed("Method Not Allowed"));
    }

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed();
    let object = store
        .put(
            &path.key,
            stream,
            HttpMetadata::from_headers(headers),
            CustomMetadata::new(),
        )
        .await?;

    let mut response = status_response(StatusCode::CREATED);
    if let Ok(value) = HeaderValue::from_str(&object.http_etag()) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `DELETE`: a document, a collection with its subtree, or everything.
async fn delete_resource(state: &AppState, path: &ResourcePath) -> Result<Response, AppError> {
    if !remove_tree(state.store.as_ref(), &path.key).await? {
        return Err(AppError::not_found("Not Found"));
    }
    Ok(status_response(StatusCode::NO_CONTENT))
}

/// `MKCOL`: store a collection marker.
async fn make_collection(
    state: &AppState,
    path: &ResourcePath,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    if path.is_root() {
        return Err(AppError::method_not_allowed("Method Not Allowed"));
    }
    let store = state.store.as_ref();
    if store.head(&path.key).await?.is_some() {
        return Err(AppError::method_not_allowed("Method Not Allowed"));
    }
    if !parent_is_collection(store, &path.key).await? {
        return Err(AppError::conflict("Conflict"));
    }

    store
        .put(
            &path.key,
            empty_body(),
            HttpMetadata::from_headers(headers),
            collection_metadata(),
        )
        .await?;
    Ok(status_response(StatusCode::CREATED))
}

/// `COPY` / `MOVE`.
async fn transfer(
    state: &AppState,
    path: &ResourcePath,
    headers: &HeaderMap,
    mode: TransferMode,
) -> Result<Response, AppError> {
    let destination = header_str(headers, &DESTINATION)
        .and_then(destination_key)
        .ok_or_else(|| AppError::bad_request("missing or invalid Destination header"))?;
    let dest = destination.key;
    if path.is_root() || dest.is_empty() {
        return Err(AppError::bad_request("the root collection cannot be transferred"));
    }

    let overwrite = header_str(headers, &OVERWRITE).map(str::trim);
    let may_overwrite = match mode {
        TransferMode::Copy => !overwrite.is_some_and(|v| v.eq_ignore_ascii_case("F")),
        TransferMode::Move => overwrite.is_some_and(|v| v.eq_ignore_ascii_case("T")),
    };

    let store = state.store.as_ref();
    if !parent_is_collection(store, &dest).await? {
        return Err(AppError::conflict("Conflict"));
    }
    let dest_exists = store.head(&dest).await?.is_some();
    if dest_exists && !may_overwrite {
        return Err(AppError::precondition_failed("Precondition Failed"));
    }

    let Some(source) = store.head(&path.key).await? else {
        return Err(AppError::not_found("Not Found"));
    };
    if overlaps(&source.key, &dest) {
        return Err(AppError::bad_request("source and destination overlap"));
    }

    let recursive = if is_collection(&source) {
        match Depth::from_header(header_str(headers, &dav::DEPTH)) {
            Some(Depth::Infinity) => true,
            Some(Depth::Zero) => false,
            _ => return Err(AppError::bad_request("unsupported Depth")),
        }
    } else {
        false
    };

    if dest_exists {
        remove_tree(store, &dest).await?;
    }

    if recursive {
        transfer_tree(state.store.clone(), &source, &dest, mode).await?;
    } else {
        transfer_object(store, &source.key, &dest, mode).await?;
    }

    tracing::debug!("{:?} `{}` -> `{}`", mode, source.key, dest);
    Ok(status_response(if dest_exists {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CREATED
    }))
}

/// Same key, or one nested inside the other.
fn overlaps(source: &str, dest: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        inner
            .strip_prefix(outer)
            .is_some_and(|rest| rest.starts_with('/'))
    };
    source == dest || nested(source, dest) || nested(dest, source)
}

/// `PROPFIND`: properties of the target and, for collections, its members.
async fn propfind(
    state: &AppState,
    path: &ResourcePath,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let depth = match headers.get(&dav::DEPTH) {
        None => Some(Depth::Infinity),
        Some(value) => Depth::from_header(Some(value.to_str().unwrap_or_default())),
    }
    .ok_or_else(|| AppError::forbidden("Forbidden"))?;

    let store = state.store.as_ref();
    let mut status = MultiStatus::new();
    let collection = if path.is_root() {
        status.push(&propfind_entry(None, None));
        true
    } else {
        let object = store
            .head(&path.key)
            .await?
            .ok_or_else(|| AppError::not_found("Not Found"))?;
        let lock = state.locks.lookup(&object.key).await?;
        status.push(&propfind_entry(Some(&object), lock.as_deref()));
        is_collection(&object)
    };

    if collection && depth != Depth::Zero {
        let mut listing = Listing::under(&path.key, depth == Depth::Infinity);
        while let Some(object) = listing.next_object(store).await? {
            let lock = state.locks.lookup(&object.key).await?;
            status.push(&propfind_entry(Some(&object), lock.as_deref()));
        }
    }

    Ok(xml_response(StatusCode::MULTI_STATUS, status.finish()))
}

/// `PROPPATCH`: acknowledge every requested property. Nothing is stored.
async fn proppatch(path: &ResourcePath, body: Body) -> Result<Response, AppError> {
    let bytes = read_body(body).await?;
    let xml = std::str::from_utf8(&bytes)
        .map_err(|_| AppError::bad_request("request body is not UTF-8"))?;

    let root = Element::parse(xml)?;
    let namespaces: Vec<Namespace> = root
        .declared_namespaces()
        .into_iter()
        .filter(|ns| ns.uri != DAV_NAMESPACE)
        .collect();

    let mode = NamespaceMode::StripDav;
    let dav_prefix = root.dav_prefix();
    let dav = dav_prefix.as_deref();
    if root.name_in(mode, dav) != "propertyupdate" {
        return Err(AppError::bad_request("expected a propertyupdate body"));
    }

    // Every set and remove block counts, in document order.
    let mut names = Vec::new();
    for action in root.elements() {
        if !matches!(action.name_in(mode, dav), "set" | "remove") {
            continue;
        }
        for prop in action.elements().filter(|e| e.name_in(mode, dav) == "prop") {
            names.extend(prop.elements().map(|e| e.name_in(mode, dav).to_string()));
        }
    }
    tracing::debug!("PROPPATCH `{}`: {:?}", path.key, names);

    let href = href_for(&path.key, path.trailing_slash);
    Ok(xml_response(
        StatusCode::MULTI_STATUS,
        proppatch_response(&href, &names, &namespaces),
    ))
}

/// `LOCK`: take an exclusive write lock on the path.
///
/// The root is never locked as an ordinary resource. A LOCK on it still
/// succeeds with a well-formed lock, so clients that lock the mount point
/// keep working, but nothing is recorded: the root reports no active lock
/// and every root LOCK is granted.
async fn lock(state: &AppState, path: &ResourcePath, body: Body) -> Result<Response, AppError> {
    let bytes = body::to_bytes(body, MAX_XML_BODY)
        .await
        .map_err(|_| AppError::malformed("unreadable lock request"))?;
    let info = std::str::from_utf8(&bytes)
        .ok()
        .and_then(|xml| Element::parse(xml).ok())
        .map(|root| root.to_mapping(NamespaceMode::LocalNames))
        .unwrap_or(XmlValue::Null);

    let lock = if path.is_root() {
        state.locks.issue(&path.key, &info)?
    } else {
        state.locks.acquire(&path.key, &info).await?
    };

    let mut response = xml_response(StatusCode::CREATED, lock_response(&lock.discovery_xml()));
    if let Ok(value) = HeaderValue::from_str(&lock.token_header()) {
        response.headers_mut().insert(LOCK_TOKEN, value);
    }
    Ok(response)
}

/// `UNLOCK`: drop the lock on the path. The token is not checked.
async fn unlock(
    state: &AppState,
    path: &ResourcePath,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    tracing::debug!(
        "UNLOCK `{}` with token {:?}",
        path.key,
        header_str(headers, &LOCK_TOKEN)
    );
    state.locks.release(&path.key).await?;
    Ok(status_response(StatusCode::NO_CONTENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_overlap() {
        assert!(overlaps("a", "a"));
        assert!(overlaps("a", "a/b"));
        assert!(overlaps("a/b", "a"));
        assert!(!overlaps("a", "ab"));
        assert!(!overlaps("a/b", "a/c"));
    }
}
