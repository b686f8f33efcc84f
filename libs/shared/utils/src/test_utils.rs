use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, LedgerBackend, SlotSettings};
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub ledger_backend: LedgerBackend,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            ledger_backend: LedgerBackend::Supabase,
        }
    }
}

impl TestConfig {
    pub fn in_memory() -> Self {
        Self {
            ledger_backend: LedgerBackend::Memory,
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            ledger_backend: self.ledger_backend,
            slots: SlotSettings::default(),
            port: 3000,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn hospital(email: &str) -> Self {
        Self::new(email, "hospital")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// PostgREST row shapes for the tables the allocator reads.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn patient_response(patient_id: &str, email: &str, name: &str) -> serde_json::Value {
        json!({
            "id": patient_id,
            "name": name,
            "email": email,
            "contact_number": "+1-555-0100"
        })
    }

    pub fn doctor_response(doctor_id: &str, name: &str, specialization: &str) -> serde_json::Value {
        json!({
            "id": doctor_id,
            "name": name,
            "specialization": specialization,
            "experience": 12,
            "rating": 4.6
        })
    }

    pub fn hospital_response(hospital_id: &str, name: &str, location: &str) -> serde_json::Value {
        json!({
            "id": hospital_id,
            "name": name,
            "location": location
        })
    }

    pub fn appointment_response(
        patient_id: &str,
        doctor_id: &str,
        hospital_id: &str,
        date: &str,
        time: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "hospital_id": hospital_id,
            "appointment_date": date,
            "appointment_time": time,
            "status": status,
            "reason_for_visit": "Persistent headache",
            "symptoms": ["headache"],
            "priority": "medium",
            "appointment_type": "consultation",
            "notes": "",
            "created_at": "2025-10-01T08:00:00Z",
            "updated_at": "2025-10-01T08:00:00Z"
        })
    }

    pub fn unique_violation_response() -> serde_json::Value {
        json!({
            "code": "23505",
            "details": "Key (doctor_id, appointment_date, appointment_time) already exists.",
            "hint": null,
            "message": "duplicate key value violates unique constraint \"appointments_active_slot_key\""
        })
    }

    pub fn foreign_key_violation_response() -> serde_json::Value {
        json!({
            "code": "23503",
            "details": "Key (doctor_id) is not present in table \"doctors\".",
            "hint": null,
            "message": "insert or update on table \"appointments\" violates foreign key constraint \"appointments_doctor_id_fkey\""
        })
    }
}
