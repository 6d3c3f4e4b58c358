pub type ProtocolId = u32;
pub type PeerId = u64;
pub type RewinderHandle = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    Server,
    Client,
}
