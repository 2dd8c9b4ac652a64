//! Participant identities and the registry that indexes them.

use crate::error::AggregationError;

/// Numeric identifier of a participant. Identifiers are dense: a registry of
/// size N holds exactly the identities 0..N-1.
pub type NodeId = i32;

/// A participant: its identifier, a transport address, and its public key.
#[derive(Clone, Debug)]
pub struct Identity<P> {
    id: NodeId,
    address: String,
    public_key: P,
}

impl<P> Identity<P> {
    pub fn new(id: NodeId, address: impl Into<String>, public_key: P) -> Self {
        Self {
            id,
            address: address.into(),
            public_key,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &P {
        &self.public_key
    }
}

/// Read-only index of all participants, ordered by identifier.
pub trait Registry<P>: Send + Sync {
    /// Total number of participants.
    fn size(&self) -> usize;

    /// Identity at a given index, if it exists.
    fn identity(&self, index: usize) -> Option<&Identity<P>>;

    /// Identities in the half-open range `[from, to)`.
    fn identities(&self, from: usize, to: usize) -> Option<&[Identity<P>]>;
}

/// Registry backed by a contiguous vector sorted by identifier.
pub struct ArrayRegistry<P> {
    ids: Vec<Identity<P>>,
}

impl<P> ArrayRegistry<P> {
    /// Build a registry from identities. The input is sorted by id; ids must
    /// be dense starting at zero.
    pub fn new(mut ids: Vec<Identity<P>>) -> Result<Self, AggregationError> {
        ids.sort_by_key(|i| i.id());
        for (idx, identity) in ids.iter().enumerate() {
            if identity.id() != idx as NodeId {
                return Err(AggregationError::UnknownOrigin(identity.id()));
            }
        }
        Ok(Self { ids })
    }
}

impl<P: Send + Sync> Registry<P> for ArrayRegistry<P> {
    fn size(&self) -> usize {
        self.ids.len()
    }

    fn identity(&self, index: usize) -> Option<&Identity<P>> {
        self.ids.get(index)
    }

    fn identities(&self, from: usize, to: usize) -> Option<&[Identity<P>]> {
        if from > to || to > self.ids.len() {
            return None;
        }
        Some(&self.ids[from..to])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(n: NodeId) -> ArrayRegistry<()> {
        ArrayRegistry::new(
            (0..n)
                .rev()
                .map(|i| Identity::new(i, format!("127.0.0.1:{}", 7000 + i), ()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn sorts_and_indexes_by_id() {
        let reg = registry(8);
        assert_eq!(reg.size(), 8);
        assert_eq!(reg.identity(3).unwrap().id(), 3);
        let range = reg.identities(2, 5).unwrap();
        assert_eq!(
            range.iter().map(Identity::id).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn rejects_sparse_ids() {
        let ids = vec![Identity::new(0, "a", ()), Identity::new(2, "b", ())];
        assert!(ArrayRegistry::new(ids).is_err());
    }

    #[test]
    fn out_of_range_lookups() {
        let reg = registry(4);
        assert!(reg.identity(4).is_none());
        assert!(reg.identities(2, 5).is_none());
        assert!(reg.identities(3, 2).is_none());
    }
}
