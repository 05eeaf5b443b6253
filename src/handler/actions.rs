//! Action parsing
//!
//! Every request on `/{key}` names the storage operation it wants through
//! the `action` query parameter. Which actions are valid depends on the
//! HTTP method.

use hyper::Method;

use super::error::GatewayError;

/// Storage operation selected by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MpuCreate,
    MpuComplete,
    Get,
    MpuUploadPart,
    MpuAbort,
    Delete,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MpuCreate => "mpu-create",
            Self::MpuComplete => "mpu-complete",
            Self::Get => "get",
            Self::MpuUploadPart => "mpu-uploadpart",
            Self::MpuAbort => "mpu-abort",
            Self::Delete => "delete",
        }
    }

    /// Actions accepted for a method; empty for methods the router does not serve
    pub fn allowed_for(method: &Method) -> &'static [Self] {
        match *method {
            Method::POST => &[Self::MpuCreate, Self::MpuComplete],
            Method::GET => &[Self::Get],
            Method::PUT => &[Self::MpuUploadPart],
            Method::DELETE => &[Self::MpuAbort, Self::Delete],
            _ => &[],
        }
    }

    /// Resolve the raw `action` parameter for a method
    pub fn parse(method: &Method, raw: Option<&str>) -> Result<Self, GatewayError> {
        let raw = raw.ok_or(GatewayError::MissingAction)?;
        Self::allowed_for(method)
            .iter()
            .copied()
            .find(|action| action.as_str() == raw)
            .ok_or_else(|| GatewayError::UnknownAction {
                action: raw.to_string(),
                method: method.clone(),
            })
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_per_method() {
        assert_eq!(
            Action::parse(&Method::POST, Some("mpu-create")).unwrap(),
            Action::MpuCreate
        );
        assert_eq!(
            Action::parse(&Method::POST, Some("mpu-complete")).unwrap(),
            Action::MpuComplete
        );
        assert_eq!(Action::parse(&Method::GET, Some("get")).unwrap(), Action::Get);
        assert_eq!(
            Action::parse(&Method::PUT, Some("mpu-uploadpart")).unwrap(),
            Action::MpuUploadPart
        );
        assert_eq!(
            Action::parse(&Method::DELETE, Some("mpu-abort")).unwrap(),
            Action::MpuAbort
        );
        assert_eq!(
            Action::parse(&Method::DELETE, Some("delete")).unwrap(),
            Action::Delete
        );
    }

    #[test]
    fn test_action_on_wrong_method() {
        let err = Action::parse(&Method::GET, Some("delete")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown action delete for GET");

        let err = Action::parse(&Method::PUT, Some("mpu-create")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown action mpu-create for PUT");
    }

    #[test]
    fn test_missing_action() {
        for method in [Method::GET, Method::PUT, Method::POST, Method::DELETE] {
            assert!(matches!(
                Action::parse(&method, None),
                Err(GatewayError::MissingAction)
            ));
        }
    }

    #[test]
    fn test_unserved_method_has_no_actions() {
        assert!(Action::allowed_for(&Method::PATCH).is_empty());
    }
}
