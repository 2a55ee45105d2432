use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::AttendanceSession;

const PAYLOAD_PREFIX: &str = "attendance";

pub const MAX_TTL_MINUTES: i64 = 24 * 60;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session ttl must be between 1 and {MAX_TTL_MINUTES} minutes, got {0}")]
    InvalidTtl(i64),
    #[error("session expiry is out of the representable time range")]
    ExpiryOutOfRange,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("scan payload is malformed: {0}")]
    MalformedPayload(String),
    #[error("token does not match the session")]
    TokenMismatch,
    #[error("session expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
    #[error("student already marked for this session")]
    AlreadyMarked,
}

/// Decoded contents of a scanned QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPayload {
    pub session_id: Uuid,
    pub token: String,
}

pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn open_session(
    class_id: Uuid,
    now: DateTime<Utc>,
    ttl_minutes: i64,
) -> Result<AttendanceSession, SessionError> {
    if !(1..=MAX_TTL_MINUTES).contains(&ttl_minutes) {
        return Err(SessionError::InvalidTtl(ttl_minutes));
    }
    let expires_at = Duration::try_minutes(ttl_minutes)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or(SessionError::ExpiryOutOfRange)?;

    Ok(AttendanceSession {
        id: Uuid::new_v4(),
        class_id,
        token: generate_token(),
        created_at: now,
        expires_at,
    })
}

pub fn scan_payload(session: &AttendanceSession) -> String {
    format!("{PAYLOAD_PREFIX}:{}:{}", session.id, session.token)
}

pub fn parse_scan_payload(text: &str) -> Result<ScanPayload, ScanError> {
    let mut parts = text.trim().splitn(3, ':');
    let (Some(prefix), Some(session), Some(token)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ScanError::MalformedPayload("expected three fields".to_string()));
    };

    if prefix != PAYLOAD_PREFIX {
        return Err(ScanError::MalformedPayload(format!("unknown prefix {prefix:?}")));
    }
    if token.is_empty() {
        return Err(ScanError::MalformedPayload("empty token".to_string()));
    }

    let session_id = Uuid::parse_str(session)
        .map_err(|_| ScanError::MalformedPayload(format!("bad session id {session:?}")))?;

    Ok(ScanPayload {
        session_id,
        token: token.to_string(),
    })
}

pub fn validate_scan(
    session: &AttendanceSession,
    token: &str,
    now: DateTime<Utc>,
    already_marked: bool,
) -> Result<(), ScanError> {
    if session.token != token {
        return Err(ScanError::TokenMismatch);
    }
    if now > session.expires_at {
        return Err(ScanError::Expired {
            expired_at: session.expires_at,
        });
    }
    if already_marked {
        return Err(ScanError::AlreadyMarked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(now: DateTime<Utc>) -> AttendanceSession {
        open_session(Uuid::new_v4(), now, 10).unwrap()
    }

    #[test]
    fn payload_parses_back() {
        let session = session_at(Utc::now());
        let parsed = parse_scan_payload(&scan_payload(&session)).unwrap();
        assert_eq!(parsed.session_id, session.id);
        assert_eq!(parsed.token, session.token);
    }

    #[test]
    fn rejects_foreign_payloads() {
        assert!(matches!(
            parse_scan_payload("https://example.com"),
            Err(ScanError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_scan_payload("attendance:not-a-uuid:abc"),
            Err(ScanError::MalformedPayload(_))
        ));
        let id = Uuid::new_v4();
        assert!(matches!(
            parse_scan_payload(&format!("attendance:{id}:")),
            Err(ScanError::MalformedPayload(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_ttl() {
        let now = Utc::now();
        let class_id = Uuid::new_v4();
        assert_eq!(
            open_session(class_id, now, 0).unwrap_err(),
            SessionError::InvalidTtl(0)
        );
        assert_eq!(
            open_session(class_id, now, i64::MAX / 1000).unwrap_err(),
            SessionError::InvalidTtl(i64::MAX / 1000)
        );

        let day_long = open_session(class_id, now, MAX_TTL_MINUTES).unwrap();
        assert_eq!(day_long.expires_at - now, Duration::minutes(MAX_TTL_MINUTES));
    }

    #[test]
    fn rejects_expiry_past_the_end_of_time() {
        let end = DateTime::<Utc>::MAX_UTC;
        assert_eq!(
            open_session(Uuid::new_v4(), end, 1).unwrap_err(),
            SessionError::ExpiryOutOfRange
        );
    }

    #[test]
    fn accepts_valid_scan() {
        let now = Utc::now();
        let session = session_at(now);
        let token = session.token.clone();
        assert_eq!(validate_scan(&session, &token, now + Duration::minutes(5), false), Ok(()));
    }

    #[test]
    fn rejects_wrong_token() {
        let now = Utc::now();
        let session = session_at(now);
        assert_eq!(
            validate_scan(&session, "forged", now, false),
            Err(ScanError::TokenMismatch)
        );
    }

    #[test]
    fn rejects_expired_session() {
        let now = Utc::now();
        let session = session_at(now);
        let token = session.token.clone();
        assert_eq!(
            validate_scan(&session, &token, now + Duration::minutes(11), false),
            Err(ScanError::Expired {
                expired_at: session.expires_at
            })
        );
    }

    #[test]
    fn rejects_duplicate_mark() {
        let now = Utc::now();
        let session = session_at(now);
        let token = session.token.clone();
        assert_eq!(
            validate_scan(&session, &token, now, true),
            Err(ScanError::AlreadyMarked)
        );
    }
}
