use std::cell::RefCell;
use std::rc::Rc;

use isolate_fetch::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use isolate_fetch::host::{BoundaryError, LocalHost, RequestDescriptor, ResponseDescriptor};
use isolate_fetch::{
    fetch, AbortController, Blob, BlobPart, Body, BodyError, ByteStream, Client, Envelope, ErrorKind,
    FormData, HeaderValue, Method, RedirectError, RedirectPolicy, Request, Response,
    ResponseInit,
};

type Seen = Rc<RefCell<Vec<RequestDescriptor>>>;

fn header<'a>(descriptor: &'a RequestDescriptor, name: &str) -> Option<&'a str> {
    descriptor
        .header_pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// A host that answers each dispatch with `route(url)`: `Some(location)`
/// for a redirect with `status`, `None` for a `200` echoing the request body.
fn recording_host(status: u16, route: fn(&str) -> Option<String>) -> (LocalHost, Seen) {
    let seen: Seen = Rc::default();
    let log = seen.clone();
    let host = LocalHost::new().with_handler(move |host, request: RequestDescriptor| {
        let log = log.clone();
        async move {
            let echoed = match request.body_stream_id {
                Some(id) => host.read_stream(id).await?,
                None => Default::default(),
            };
            let reply = match route(&request.url) {
                Some(location) => ResponseDescriptor {
                    header_pairs: vec![("location".to_owned(), location)],
                    status,
                    body_stream_id: None,
                    url: None,
                },
                None => ResponseDescriptor {
                    header_pairs: vec![],
                    status: 200,
                    body_stream_id: Some(host.stream_from_bytes(echoed)?),
                    url: None,
                },
            };
            log.borrow_mut().push(request);
            Ok::<_, BoundaryError>(reply)
        }
    });
    (host, seen)
}

#[tokio::test]
async fn test_slice_composition() {
    let local = LocalHost::new();
    let blob = Blob::with_host(
        &local.to_any(),
        ["hello ", "wide ", "world"],
        "text/plain",
    )
    .unwrap();
    let text = "hello wide world";

    for (start, end) in [(0, 16), (3, 9), (6, 11), (15, 16), (4, 4)] {
        let slice = blob.slice(Some(start), Some(end), None);
        assert_eq!(slice.size(), (end - start) as u64);
        assert_eq!(
            slice.text().await.unwrap(),
            text[start as usize..end as usize]
        );
    }

    let nested = blob.slice(Some(2), Some(14), None).slice(Some(4), Some(-2), None);
    assert_eq!(nested.text().await.unwrap(), &text[6..12]);
}

#[tokio::test]
async fn test_concatenation_size() {
    let local = LocalHost::new();
    let host = local.to_any();
    let inner = Blob::with_host(&host, ["abc", "de"], "").unwrap();
    let streamed = Blob::from_stream(ByteStream::from_chunks(["123", "4"]), 4, "");
    let parts = [
        BlobPart::from(&inner),
        BlobPart::from(streamed),
        BlobPart::from("!"),
    ];
    let outer = Blob::with_host(&host, parts, "").unwrap();

    assert_eq!(outer.size(), 5 + 4 + 1);
    assert_eq!(outer.text().await.unwrap(), "abcde1234!");
    assert_eq!(Blob::empty().size(), 0);
}

#[tokio::test]
async fn test_one_shot_and_null_bodies() {
    let local = LocalHost::new();
    local
        .run(async {
            let mut response = Response::new("payload", ResponseInit::default()).unwrap();
            assert_eq!(response.text().await.unwrap().as_str(), "payload");
            assert!(response.body_used());
            let err = response.bytes().await.unwrap_err();
            assert!(matches!(err, BodyError::BodyAlreadyConsumed));

            let mut empty = Response::new(Body::empty(), ResponseInit::new(204)).unwrap();
            for _ in 0..2 {
                assert!(empty.bytes().await.unwrap().is_empty());
                assert_eq!(empty.text().await.unwrap().as_str(), "");
                assert!(empty.json::<Option<u8>>().await.unwrap().is_none());
                assert_eq!(empty.blob().await.unwrap().size(), 0);
                assert!(empty.form_data().await.unwrap().is_empty());
            }
            assert!(!empty.body_used());
        })
        .await;
}

#[tokio::test]
async fn test_clone_independence() {
    let local = LocalHost::new();
    let id = local.stream_from_chunks(["first ", "second"]).unwrap();
    let mut original = Response::new(
        Body::from_stream(ByteStream::from_host(local.to_any(), id)),
        ResponseInit::default(),
    )
    .unwrap();

    let mut copy = original.try_clone().unwrap();
    assert_eq!(copy.text().await.unwrap().as_str(), "first second");
    assert!(!original.body_used());
    assert_eq!(original.text().await.unwrap().as_str(), "first second");

    assert!(matches!(
        original.try_clone(),
        Err(BodyError::BodyAlreadyConsumed)
    ));
}

#[tokio::test]
async fn test_multipart_round_trip() {
    let local = LocalHost::new();
    local
        .run(async {
            let mut form = FormData::new();
            form.append("title", "line one\nline two");
            form.append("title", "again");
            form.append_blob(
                "upload",
                Blob::new([&b"\x00\x01binary"[..]], "Application/Octet-Stream").unwrap(),
                Some("data.bin"),
            );
            form.append_blob("anonymous", Blob::new(["x"], "text/plain").unwrap(), None);

            let encoded = form.encode().unwrap();
            assert!(encoded.content_type().starts_with("multipart/form-data; boundary="));

            let decoded = FormData::decode(&encoded, Some(encoded.content_type()))
                .await
                .unwrap();
            assert_eq!(decoded.len(), 4);

            let titles: Vec<_> = decoded
                .get_all("title")
                .into_iter()
                .filter_map(|value| value.as_text())
                .collect();
            assert_eq!(titles, ["line one\r\nline two", "again"]);

            let upload = decoded.get("upload").unwrap();
            assert_eq!(upload.filename(), Some("data.bin"));
            let blob = upload.as_blob().unwrap();
            assert_eq!(blob.content_type(), "application/octet-stream");
            assert_eq!(blob.bytes().await.unwrap().as_ref(), b"\x00\x01binary");

            assert_eq!(decoded.get("anonymous").unwrap().filename(), Some("blob"));
        })
        .await;
}

#[tokio::test]
async fn test_post_303_downgrades_to_get() {
    let (local, seen) = recording_host(303, |url| {
        url.ends_with("/submit").then(|| "/result".to_owned())
    });
    let mut response = local
        .run(async {
            let request = Request::post("https://example.com/submit")
                .unwrap()
                .header(AUTHORIZATION, HeaderValue::from_static("Bearer t"))
                .with_body("name=alice")
                .unwrap();
            fetch(request).await
        })
        .await
        .unwrap();

    assert!(response.redirected());
    assert_eq!(response.url().unwrap().as_str(), "https://example.com/result");
    assert_eq!(response.text().await.unwrap().as_str(), "");

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, "POST");
    assert!(seen[0].body_stream_id.is_some());
    assert_eq!(header(&seen[0], "content-length"), Some("10"));

    assert_eq!(seen[1].method, "GET");
    assert!(seen[1].body_stream_id.is_none());
    assert_eq!(header(&seen[1], CONTENT_TYPE.as_str()), None);
    assert_eq!(header(&seen[1], CONTENT_LENGTH.as_str()), None);
    assert_eq!(header(&seen[1], "authorization"), Some("Bearer t"));
}

#[tokio::test]
async fn test_307_resends_body() {
    let (local, seen) = recording_host(307, |url| {
        url.ends_with("/old").then(|| "https://example.com/new".to_owned())
    });
    let mut response = local
        .run(async {
            let request = Request::put("https://example.com/old")
                .unwrap()
                .with_body("same body")
                .unwrap();
            fetch(request).await
        })
        .await
        .unwrap();

    assert_eq!(seen.borrow()[1].method, "PUT");
    assert_eq!(response.text().await.unwrap().as_str(), "same body");
}

#[tokio::test]
async fn test_hop_limit() {
    let (local, seen) = recording_host(307, |url| Some(format!("{url}x")));
    let err = local
        .run(fetch(Request::get("https://example.com/").unwrap()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Redirect);
    assert!(matches!(
        err.downcast_ref::<RedirectError>(),
        Some(RedirectError::TooManyRedirects { limit: 20 })
    ));
    assert_eq!(seen.borrow().len(), 21);
}

#[tokio::test]
async fn test_cross_origin_strips_authorization() {
    let (local, seen) = recording_host(302, |url| match url {
        "https://a.example/start" => Some("https://a.example/same".to_owned()),
        "https://a.example/same" => Some("https://b.example/other".to_owned()),
        _ => None,
    });
    local
        .run(async {
            let request = Request::get("https://a.example/start")
                .unwrap()
                .header(AUTHORIZATION, HeaderValue::from_static("Basic c2VjcmV0"));
            fetch(request).await
        })
        .await
        .unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    assert_eq!(header(&seen[0], "authorization"), Some("Basic c2VjcmV0"));
    assert_eq!(header(&seen[1], "authorization"), Some("Basic c2VjcmV0"));
    assert_eq!(header(&seen[2], "authorization"), None);
}

#[tokio::test]
async fn test_redirect_policies() {
    let (local, seen) = recording_host(301, |url| {
        url.ends_with("/moved").then(|| "/here".to_owned())
    });

    let err = local
        .run(
            Client::new().redirect(RedirectPolicy::Error).fetch(
                Request::get("https://example.com/moved").unwrap(),
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RedirectError>(),
        Some(RedirectError::RedirectAttempted { status: 301 })
    ));

    let response = local
        .run(fetch(
            Request::get("https://example.com/moved")
                .unwrap()
                .redirect(RedirectPolicy::Manual),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 301);
    assert_eq!(response.headers()["location"], "/here");
    assert_eq!(seen.borrow().len(), 2);
}

#[tokio::test]
async fn test_stream_body_cannot_be_redirected() {
    let (local, seen) = recording_host(307, |url| {
        url.ends_with("/upload").then(|| "/elsewhere".to_owned())
    });
    let err = local
        .run(async {
            let request = Request::post("https://example.com/upload")
                .unwrap()
                .with_body(ByteStream::from_chunks(["a", "b"]))
                .unwrap();
            fetch(request).await
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<RedirectError>(),
        Some(RedirectError::StreamBodyAlreadyConsumed)
    ));
    assert_eq!(seen.borrow().len(), 1);
}

#[tokio::test]
async fn test_sent_stream_body_follows_303_as_get() {
    let (local, seen) = recording_host(303, |url| {
        url.ends_with("/upload").then(|| "/status".to_owned())
    });
    let response = local
        .run(async {
            let request = Request::post("https://example.com/upload")
                .unwrap()
                .with_body(ByteStream::from_chunks(["part one, ", "part two"]))
                .unwrap();
            fetch(request).await
        })
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.redirected());

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, "POST");
    assert!(seen[0].body_stream_id.is_some());
    assert_eq!(seen[1].method, "GET");
    assert_eq!(seen[1].url, "https://example.com/status");
    assert!(seen[1].body_stream_id.is_none());
}

#[tokio::test]
async fn test_abort_before_dispatch() {
    let (local, seen) = recording_host(200, |_| None);
    let controller = AbortController::new();
    controller.abort();

    let err = local
        .run(fetch(
            Request::get("https://example.com/")
                .unwrap()
                .signal(controller.signal()),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert!(seen.borrow().is_empty());
}

#[tokio::test]
async fn test_request_validation() {
    assert!(Request::get("ws://example.com/").is_err());
    assert!(Request::new(Method::HEAD, "https://example.com/")
        .unwrap()
        .with_body("body")
        .is_err());
    assert!(Response::new(Body::empty(), ResponseInit::new(600)).is_err());
}
