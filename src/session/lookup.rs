use super::Session;
use crate::error::{ProtoError, ProtoResult};

impl Session {
    /// Point lookup. snapid != 0 → вид снапшота, иначе последнее закоммиченное
    /// состояние. Ok(None) = not found; Ok(Some(vec![])) = найдено пустое значение.
    pub fn get_value(&self, tableid: &[u8], key: &[u8], snapid: u64) -> ProtoResult<Option<Vec<u8>>> {
        if tableid.is_empty() {
            return Err(ProtoError::invalid_argument("tableid must not be empty"));
        }
        if snapid != 0 {
            let snap = self.snapshot(snapid)?;
            self.engine
                .get(tableid, key, Some(snap.seq()))
                .map_err(ProtoError::engine)
        } else {
            self.engine.get(tableid, key, None).map_err(ProtoError::engine)
        }
    }
}
