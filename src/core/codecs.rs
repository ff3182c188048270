//! Aggregate codec negotiation across backends

use crate::codec::CodecList;

impl super::CallCore {
    /// Union of every backend's negotiated codec set
    ///
    /// Backends are visited in registration order; duplicates are dropped
    /// by name keeping the first occurrence, so the first backend's
    /// preference order dominates.
    pub async fn get_codecs(&self) -> CodecList {
        let managers = self.managers.read().await.clone();
        let mut all = CodecList::new();
        for manager in managers {
            all.append(manager.codecs());
        }
        all
    }

    /// Push a preference list to every backend
    ///
    /// Each backend independently accepts or rejects entries, mutating
    /// the passed list in place as it goes; afterwards the list reflects
    /// the aggregate accepted set.
    pub async fn set_codecs(&self, codecs: &mut CodecList) {
        let managers = self.managers.read().await.clone();
        for manager in managers {
            manager.set_codecs(codecs).await;
        }
    }
}
