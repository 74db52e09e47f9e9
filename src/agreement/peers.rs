use crate::common::crypto::Pubkey;

pub type NodeId = usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Regular,
    General,
}

/// Public face of a participant. Built once by the harness; the flags are
/// fixed before any node starts.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub pubkey: Pubkey,
    pub is_byzantine: bool,
    pub role: Role,
}

impl NodeIdentity {
    pub fn new(id: NodeId, pubkey: Pubkey) -> Self {
        NodeIdentity {
            id,
            pubkey,
            is_byzantine: false,
            role: Role::Regular,
        }
    }

    pub fn is_general(&self) -> bool {
        self.role == Role::General
    }
}

/// Every participant, indexed by id. Ids are dense, `0..n`.
#[derive(Debug, Clone)]
pub struct Roster {
    pub members: Vec<NodeIdentity>,
}

impl Roster {
    pub fn new(members: Vec<NodeIdentity>) -> Self {
        Roster { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeIdentity> {
        self.members.get(id)
    }

    pub fn pubkey(&self, id: NodeId) -> Option<&Pubkey> {
        self.get(id).map(|member| &member.pubkey)
    }

    pub fn general(&self) -> Option<NodeId> {
        self.members
            .iter()
            .find(|member| member.is_general())
            .map(|member| member.id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().map(|member| member.id)
    }
}
