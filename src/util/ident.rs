use uuid::Uuid;

const LETTERS: &[u8] = b"abcdef";

/// Generates a time-ordered identifier for archive file names.
///
/// The identifier is a UUIDv7 as 32 lowercase hex digits. Its first and last
/// characters are always letters, a leading or trailing digit is replaced by
/// a random letter in `a..=f`.
pub fn archive_id() -> String {
    let mut id: Vec<u8> = Uuid::now_v7().simple().to_string().into_bytes();
    let noise = Uuid::new_v4();
    let noise = noise.as_bytes();

    if let Some(first) = id.first_mut() {
        if first.is_ascii_digit() {
            *first = LETTERS[usize::from(noise[0]) % LETTERS.len()];
        }
    }
    if let Some(last) = id.last_mut() {
        if last.is_ascii_digit() {
            *last = LETTERS[usize::from(noise[1]) % LETTERS.len()];
        }
    }

    id.into_iter().map(char::from).collect()
}
