use actix_web::web::Bytes;
use serde::Serialize;

/// Frame one server-sent event.
pub fn event(name: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {name}\ndata: {data}\n\n"))
}

/// Frame a JSON payload as a server-sent event.
pub fn json_event<T: Serialize>(name: &str, payload: &T) -> Bytes {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    event(name, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_event_name_and_data() {
        let bytes = event("patch", "{\"a\":1}");
        assert_eq!(&bytes[..], b"event: patch\ndata: {\"a\":1}\n\n");
    }
}
