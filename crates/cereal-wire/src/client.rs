use crate::{Frame, FrameError, KeyedDigest, Request, Response, Transport};
use cereal_core::{Grain, Timeout};
use std::time::Duration;

/// Signs requests and waits for their answers over one transport.
pub struct Client<T> {
    transport: T,
    digest: KeyedDigest,
    context: u16,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, digest: KeyedDigest, context: u16) -> Self {
        Self {
            transport,
            digest,
            context,
        }
    }

    pub async fn lock(
        &mut self,
        subject: &str,
        resource: &str,
        duration: Duration,
        timeout: impl Into<Timeout>,
    ) -> Result<Response, FrameError> {
        self.call(&Request::Lock {
            subject: subject.to_string(),
            resource: resource.to_string(),
            timeout: timeout.into(),
            duration,
        })
        .await
    }

    pub async fn release(&mut self, grain: &Grain) -> Result<Response, FrameError> {
        self.call(&Request::Release(grain.clone())).await
    }

    pub async fn call(&mut self, request: &Request) -> Result<Response, FrameError> {
        let payload = request.encode()?;
        let signature = self.digest.sign(&payload, self.context);
        let frame = Frame::new(self.context, payload)
            .with_signature(signature.to_vec())
            .encode()?;

        self.transport.send_frame(&frame).await?;
        let reply = self.transport.recv_frame().await?.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )
        })?;
        Response::decode(reply)
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}
