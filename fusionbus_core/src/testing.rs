//! Message type shared by the unit tests.

use crate::message::Message;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TestMsg {
    Job(u32),
    Other(u32),
    Tick(u32),
    Fail,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TestKind {
    Job,
    Other,
    Tick,
    Fail,
    Shutdown,
}

impl Message for TestMsg {
    type Kind = TestKind;
    type Reply = String;

    fn kind(&self) -> TestKind {
        match self {
            TestMsg::Job(_) => TestKind::Job,
            TestMsg::Other(_) => TestKind::Other,
            TestMsg::Tick(_) => TestKind::Tick,
            TestMsg::Fail => TestKind::Fail,
            TestMsg::Shutdown => TestKind::Shutdown,
        }
    }
}
