//! Response builders for the HTTP-line wire format.
//!
//! Lines are separated by a bare `\n`, not CRLF; clients of this server parse
//! the relaxed form.

/// Value of the `Server` header.
pub const SERVER_NAME: &str = "ktserve";

/// `200 OK` with an arbitrary body.
pub fn ok_response(content_type: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 200 OK\n\
         Server: {SERVER_NAME}\n\
         Content-type: {content_type}\n\
         Content-length: {}\n\n",
        body.len()
    );
    let mut out = Vec::with_capacity(head.len() + body.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(body);
    out
}

pub fn html_response(html: &str) -> Vec<u8> {
    ok_response("text/html", html.as_bytes())
}

pub fn text_response(text: &str) -> Vec<u8> {
    ok_response("text/plain", text.as_bytes())
}

/// `308 Permanent Redirect` to `location`.
pub fn redirect_response(location: &str) -> Vec<u8> {
    format!("HTTP/1.1 308 Permanent Redirect\nLocation: {location}\n\n").into_bytes()
}

pub fn not_found_response() -> Vec<u8> {
    format!(
        "HTTP/1.1 404 Not Found\n\
         Server: {SERVER_NAME}\n\
         Content-type: text/plain\n\n\
         Page not found"
    )
    .into_bytes()
}

/// `400 Bad Request` echoing the offending request line.
pub fn bad_request_response(request: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 400 Bad Request\n\
         Server: {SERVER_NAME}\n\
         Content-type: text/plain\n\n\
         Bad Request:\n{request}"
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_carries_length_and_type() {
        let rp = String::from_utf8(text_response("héllo")).unwrap();
        assert!(rp.starts_with("HTTP/1.1 200 OK\n"));
        assert!(rp.contains("\nContent-type: text/plain\n"));
        assert!(rp.contains("\nContent-length: 6\n\n"));
        assert!(rp.ends_with("\n\nhéllo"));
    }

    #[test]
    fn redirect_has_location() {
        let rp = String::from_utf8(redirect_response("/a/index.html?x=1")).unwrap();
        assert_eq!(
            rp,
            "HTTP/1.1 308 Permanent Redirect\nLocation: /a/index.html?x=1\n\n"
        );
    }

    #[test]
    fn bad_request_echoes_request() {
        let rp = String::from_utf8(bad_request_response("GET nowhere")).unwrap();
        assert!(rp.starts_with("HTTP/1.1 400 Bad Request\n"));
        assert!(rp.ends_with("Bad Request:\nGET nowhere"));
    }

    #[test]
    fn not_found_status() {
        let rp = String::from_utf8(not_found_response()).unwrap();
        assert!(rp.starts_with("HTTP/1.1 404 Not Found\n"));
    }
}
