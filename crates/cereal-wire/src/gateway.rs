use crate::{Authenticator, Frame, FrameError, PROTOCOL_VERSION, Request, Response};
use bytes::Bytes;
use cereal_core::{LockError, LockServer};
use tracing::{debug, warn};

/// Turns raw frames into trusted requests.
#[derive(Debug, Clone)]
pub struct Gateway<A> {
    authenticator: A,
}

impl<A: Authenticator> Gateway<A> {
    pub fn new(authenticator: A) -> Self {
        Self { authenticator }
    }

    /// Decode a frame, check its version and signature, then decode the payload.
    pub fn parse(&self, data: Bytes) -> Result<Request, FrameError> {
        let frame = Frame::decode(data)?;
        if frame.version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(frame.version));
        }
        if !self
            .authenticator
            .authenticate(&frame.payload, frame.context, &frame.signature)
        {
            warn!(context = frame.context, "rejected frame with a bad signature");
            return Err(FrameError::InvalidSignature);
        }
        Request::decode(frame.payload)
    }
}

/// Run one request against a lock server. Blocks for as long as the lock wait does.
pub fn dispatch(server: &dyn LockServer, request: Request) -> Response {
    match request {
        Request::Lock {
            subject,
            resource,
            timeout,
            duration,
        } => match server.lock(&subject, &resource, duration, timeout) {
            Ok(grain) if grain.is_empty() => {
                debug!(%subject, %resource, "lock wait timed out");
                Response::TimedOut
            }
            Ok(grain) => Response::Granted(grain),
            Err(err @ LockError::PossibleDeadlock { .. }) => Response::Deadlock(err.to_string()),
            Err(err) => Response::Rejected(err.to_string()),
        },
        Request::Release(grain) => match server.release(&grain) {
            Ok(()) => Response::Released,
            Err(err) => Response::Rejected(err.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyedDigest, Unauthenticated};
    use cereal_core::{Grain, Timeout};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Grants A, times out on B, refuses C as a deadlock.
    #[derive(Default)]
    struct Scripted {
        released: Mutex<Vec<String>>,
    }

    impl LockServer for Scripted {
        fn lock(
            &self,
            subject: &str,
            resource: &str,
            duration: Duration,
            _timeout: Timeout,
        ) -> Result<Grain, LockError> {
            match resource {
                "A" => Ok(Grain::issue(subject, resource, duration)),
                "C" => Err(LockError::PossibleDeadlock {
                    subject: subject.into(),
                    resource: resource.into(),
                    holder: "other".into(),
                }),
                "gone" => Err(LockError::Disposed {
                    system: "cereal.test".into(),
                }),
                _ => Ok(Grain::empty()),
            }
        }

        fn release(&self, grain: &Grain) -> Result<(), LockError> {
            self.released.lock().unwrap().push(grain.id().to_string());
            Ok(())
        }

        fn optimize(&self) -> Result<usize, LockError> {
            Ok(0)
        }

        fn has_deadlock_detection(&self) -> bool {
            true
        }
    }

    fn lock(resource: &str) -> Request {
        Request::Lock {
            subject: "alice".into(),
            resource: resource.into(),
            timeout: Timeout::Default,
            duration: Duration::from_secs(1),
        }
    }

    fn signed(digest: &KeyedDigest, request: &Request, context: u16) -> Bytes {
        let payload = request.encode().unwrap();
        let signature = digest.sign(&payload, context);
        Frame::new(context, payload)
            .with_signature(signature.to_vec())
            .encode()
            .unwrap()
    }

    #[test]
    fn test_parse_accepts_signed_frames() {
        let digest = KeyedDigest::new("k");
        let gateway = Gateway::new(digest.clone());

        let request = lock("A");
        assert_eq!(gateway.parse(signed(&digest, &request, 9)).unwrap(), request);
    }

    #[test]
    fn test_parse_rejects_forgeries() {
        let gateway = Gateway::new(KeyedDigest::new("k"));
        let forged = signed(&KeyedDigest::new("guess"), &lock("A"), 9);

        assert!(matches!(
            gateway.parse(forged),
            Err(FrameError::InvalidSignature)
        ));
    }

    #[test]
    fn test_parse_rejects_other_versions() {
        let gateway = Gateway::new(Unauthenticated);
        let mut frame = Frame::new(0, lock("A").encode().unwrap());
        frame.version = 2;

        assert!(matches!(
            gateway.parse(frame.encode().unwrap()),
            Err(FrameError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_dispatch_maps_outcomes() {
        let server = Scripted::default();

        let Response::Granted(grain) = dispatch(&server, lock("A")) else {
            panic!("expected a grant");
        };
        assert_eq!(grain.subject(), "alice");
        assert_eq!(dispatch(&server, lock("B")), Response::TimedOut);
        assert!(matches!(dispatch(&server, lock("C")), Response::Deadlock(_)));
        assert!(matches!(dispatch(&server, lock("gone")), Response::Rejected(_)));

        assert_eq!(
            dispatch(&server, Request::Release(grain.clone())),
            Response::Released
        );
        assert_eq!(*server.released.lock().unwrap(), vec![grain.id().to_string()]);
    }
}
