/*
    Byzantine agreement among n nodes of which at most f < n / 3 may be
    faulty, on a single binary value.

    Two protocols share one node runtime. In flooding mode a designated
    general signs its value and every node relays each value it accepts,
    appending its own signature, for k pulses; a node decides the value if it
    accepted exactly one. In vote-echo mode there is no leader: every node
    votes, every vote is echoed to everyone, and a node decides once enough
    votes are confirmed by an echo quorum.

    Nodes run as tokio tasks and talk only through a message bus of
    per-node mailboxes. Faulty behaviour is injected through fault
    strategies on the sending side and interceptors on the bus.
*/

pub mod agreement;
pub mod common;
pub mod network;
