use chrono::Utc;
use rand::RngCore;

/// Length of generated identifiers, matching legacy ObjectId strings.
pub const ID_LEN: usize = 24;

pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Time-prefixed random hex ids shaped like the ObjectIds already stored in
/// the collection files: 8 hex chars of Unix seconds, then random hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectIdGenerator;

impl IdGenerator for ObjectIdGenerator {
    fn generate(&self) -> String {
        let seconds = Utc::now().timestamp().max(0) as u64;
        let mut random = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut random);

        let mut id = format!("{:08x}{}", seconds, hex::encode(random));
        id.truncate(ID_LEN);
        id
    }
}

pub fn is_object_id(candidate: &str) -> bool {
    candidate.len() == ID_LEN
        && candidate
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
