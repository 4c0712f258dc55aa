use std::marker::PhantomData;

use uuid::Uuid;

/// An entity id plus a type marker, held across `.await` points instead of
/// a borrowed or owned snapshot. The idiomatic replacement for the
/// source's "reattach a detached instance" pattern: a worker
/// that holds a handle across minutes of suspension re-queries the live
/// row by id rather than trusting a stale snapshot or attempting to merge
/// one back into a session.
#[derive(Debug)]
pub struct ReloadHandle<T> {
    pub id: Uuid,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ReloadHandle<T> {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for ReloadHandle<T> {
    fn clone(&self) -> Self {
        Self::new(self.id)
    }
}

impl<T> Copy for ReloadHandle<T> {}

impl<T> PartialEq for ReloadHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ReloadHandle<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use vedfolnir_common::types::CaptionGenerationTask;

    #[test]
    fn carries_id_and_is_copy() {
        let id = Uuid::new_v4();
        let handle: ReloadHandle<CaptionGenerationTask> = ReloadHandle::new(id);
        let copied = handle;
        assert_eq!(handle.id, copied.id);
        assert_eq!(handle.id, id);
    }
}
