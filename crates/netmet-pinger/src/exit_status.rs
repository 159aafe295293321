//! Exit codes, ported from `netmet/utils/ping.py::EXIT_STATUS` and extended
//! per spec §4.5 with the codes the original never defined (read errors,
//! cancellation).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetCode {
    Success = 0,
    HostNotFound = 1,
    Timeout = 2,
    RootRequired = 3,
    CantOpenSocket = 4,
    SocketSendError = 5,
    SocketReadError = 6,
    Cancelled = 7,
}

impl RetCode {
    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, RetCode::Success)
    }
}
