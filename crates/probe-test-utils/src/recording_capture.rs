use std::collections::VecDeque;
use std::sync::Mutex;

use probe_pipeline::{Capture, CaptureError};
use probe_protocol::{HttpRequest, HttpResponse};
use uuid::Uuid;

/// An in-memory [`Capture`] that records every request/frame it sees and
/// replays queued responses, for use as the host hook in pipeline tests.
#[derive(Default)]
pub struct RecordingCapture {
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<Result<HttpResponse, CaptureError>>>,
    ws_frames: Mutex<Vec<(Uuid, Vec<u8>)>>,
}

impl RecordingCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return from the next `on_request` call. Responses
    /// not queued default to a bare 200 with no body.
    pub fn queue_response(&self, response: HttpResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_error(&self, error: CaptureError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn ws_frames(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.ws_frames.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Capture for RecordingCapture {
    async fn on_request(&self, request: HttpRequest) -> Result<HttpResponse, CaptureError> {
        self.requests.lock().unwrap().push(request);
        let queued = self.responses.lock().unwrap().pop_front();
        queued.unwrap_or(Ok(HttpResponse {
            status_code: 200,
            headers: Default::default(),
            body: None,
        }))
    }

    async fn on_ws_frame(&self, session_id: Uuid, payload: Vec<u8>) -> Result<(), CaptureError> {
        self.ws_frames.lock().unwrap().push((session_id, payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_queued_responses_in_order() {
        let capture = RecordingCapture::new();
        capture.queue_response(HttpResponse {
            status_code: 201,
            headers: Default::default(),
            body: None,
        });

        let response = capture
            .on_request(HttpRequest {
                method: "GET".to_owned(),
                url: "https://example.test/".to_owned(),
                headers: Default::default(),
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status_code, 201);
        assert_eq!(capture.requests().len(), 1);
    }

    #[tokio::test]
    async fn defaults_to_a_bare_200_when_nothing_is_queued() {
        let capture = RecordingCapture::new();
        let response = capture
            .on_request(HttpRequest {
                method: "GET".to_owned(),
                url: "https://example.test/".to_owned(),
                headers: Default::default(),
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);
    }
}
