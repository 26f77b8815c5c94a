//! Command catalog
//!
//! A representative subset of the Z-Stack MT command set: enough to bring a
//! coprocessor up, exchange application data and observe network events.

use crate::schema::{CommandDef, FieldDef, FieldKind};
use crate::types::{CommandClass, CommandHeader, CommandType, Subsystem};

const fn header(kind: CommandType, subsystem: Subsystem, id: u8) -> CommandHeader {
    CommandHeader::new(kind, subsystem, id)
}

const fn field(name: &'static str, kind: FieldKind) -> FieldDef {
    FieldDef::new(name, kind)
}

const STATUS: FieldDef = field("Status", FieldKind::U8);

// ----------------------------------------------------------------------------
// SYS
// ----------------------------------------------------------------------------

pub mod sys {
    use super::*;

    pub static PING_REQ: CommandDef = CommandDef {
        name: "SYS.Ping.Req",
        header: header(CommandType::SREQ, Subsystem::SYS, 0x01),
        class: CommandClass::Request,
        fields: &[],
        response: Some(&PING_RSP),
    };

    pub static PING_RSP: CommandDef = CommandDef {
        name: "SYS.Ping.Rsp",
        header: header(CommandType::SRSP, Subsystem::SYS, 0x01),
        class: CommandClass::Response,
        fields: &[field("Capabilities", FieldKind::U16)],
        response: None,
    };

    pub static VERSION_REQ: CommandDef = CommandDef {
        name: "SYS.Version.Req",
        header: header(CommandType::SREQ, Subsystem::SYS, 0x02),
        class: CommandClass::Request,
        fields: &[],
        response: Some(&VERSION_RSP),
    };

    pub static VERSION_RSP: CommandDef = CommandDef {
        name: "SYS.Version.Rsp",
        header: header(CommandType::SRSP, Subsystem::SYS, 0x02),
        class: CommandClass::Response,
        fields: &[
            field("TransportRev", FieldKind::U8),
            field("ProductId", FieldKind::U8),
            field("MajorRel", FieldKind::U8),
            field("MinorRel", FieldKind::U8),
            field("MaintRel", FieldKind::U8),
        ],
        response: None,
    };

    /// Fire-and-forget reset; the device answers with `RESET_IND`
    pub static RESET_REQ: CommandDef = CommandDef {
        name: "SYS.ResetReq.Req",
        header: header(CommandType::AREQ, Subsystem::SYS, 0x00),
        class: CommandClass::Request,
        fields: &[field("Type", FieldKind::U8)],
        response: None,
    };

    pub static RESET_IND: CommandDef = CommandDef {
        name: "SYS.ResetInd.Callback",
        header: header(CommandType::AREQ, Subsystem::SYS, 0x80),
        class: CommandClass::Callback,
        fields: &[
            field("Reason", FieldKind::U8),
            field("TransportRev", FieldKind::U8),
            field("ProductId", FieldKind::U8),
            field("MajorRel", FieldKind::U8),
            field("MinorRel", FieldKind::U8),
            field("HwRev", FieldKind::U8),
        ],
        response: None,
    };
}

// ----------------------------------------------------------------------------
// AF
// ----------------------------------------------------------------------------

pub mod af {
    use super::*;

    pub static DATA_REQUEST: CommandDef = CommandDef {
        name: "AF.DataRequest.Req",
        header: header(CommandType::SREQ, Subsystem::AF, 0x01),
        class: CommandClass::Request,
        fields: &[
            field("DstAddr", FieldKind::U16),
            field("DstEndpoint", FieldKind::U8),
            field("SrcEndpoint", FieldKind::U8),
            field("ClusterId", FieldKind::U16),
            field("TSN", FieldKind::U8),
            field("Options", FieldKind::U8),
            field("Radius", FieldKind::U8),
            field("Data", FieldKind::Bytes),
        ],
        response: Some(&DATA_REQUEST_RSP),
    };

    pub static DATA_REQUEST_RSP: CommandDef = CommandDef {
        name: "AF.DataRequest.Rsp",
        header: header(CommandType::SRSP, Subsystem::AF, 0x01),
        class: CommandClass::Response,
        fields: &[STATUS],
        response: None,
    };

    pub static DATA_CONFIRM: CommandDef = CommandDef {
        name: "AF.DataConfirm.Callback",
        header: header(CommandType::AREQ, Subsystem::AF, 0x80),
        class: CommandClass::Callback,
        fields: &[
            STATUS,
            field("Endpoint", FieldKind::U8),
            field("TSN", FieldKind::U8),
        ],
        response: None,
    };

    pub static INCOMING_MSG: CommandDef = CommandDef {
        name: "AF.IncomingMsg.Callback",
        header: header(CommandType::AREQ, Subsystem::AF, 0x81),
        class: CommandClass::Callback,
        fields: &[
            field("GroupId", FieldKind::U16),
            field("ClusterId", FieldKind::U16),
            field("SrcAddr", FieldKind::U16),
            field("SrcEndpoint", FieldKind::U8),
            field("DstEndpoint", FieldKind::U8),
            field("WasBroadcast", FieldKind::U8),
            field("LQI", FieldKind::U8),
            field("SecurityUse", FieldKind::U8),
            field("TimeStamp", FieldKind::U32),
            field("TSN", FieldKind::U8),
            field("Data", FieldKind::Bytes),
        ],
        response: None,
    };
}

// ----------------------------------------------------------------------------
// ZDO
// ----------------------------------------------------------------------------

pub mod zdo {
    use super::*;

    pub static STARTUP_FROM_APP: CommandDef = CommandDef {
        name: "ZDO.StartupFromApp.Req",
        header: header(CommandType::SREQ, Subsystem::ZDO, 0x40),
        class: CommandClass::Request,
        fields: &[field("StartDelay", FieldKind::U16)],
        response: Some(&STARTUP_FROM_APP_RSP),
    };

    pub static STARTUP_FROM_APP_RSP: CommandDef = CommandDef {
        name: "ZDO.StartupFromApp.Rsp",
        header: header(CommandType::SRSP, Subsystem::ZDO, 0x40),
        class: CommandClass::Response,
        fields: &[field("State", FieldKind::U8)],
        response: None,
    };

    pub static MGMT_PERMIT_JOIN_REQ: CommandDef = CommandDef {
        name: "ZDO.MgmtPermitJoinReq.Req",
        header: header(CommandType::SREQ, Subsystem::ZDO, 0x36),
        class: CommandClass::Request,
        fields: &[
            field("AddrMode", FieldKind::U8),
            field("Dst", FieldKind::U16),
            field("Duration", FieldKind::U8),
            field("TCSignificance", FieldKind::U8),
        ],
        response: Some(&MGMT_PERMIT_JOIN_REQ_RSP),
    };

    pub static MGMT_PERMIT_JOIN_REQ_RSP: CommandDef = CommandDef {
        name: "ZDO.MgmtPermitJoinReq.Rsp",
        header: header(CommandType::SRSP, Subsystem::ZDO, 0x36),
        class: CommandClass::Response,
        fields: &[STATUS],
        response: None,
    };

    pub static MGMT_PERMIT_JOIN_RSP: CommandDef = CommandDef {
        name: "ZDO.MgmtPermitJoinRsp.Callback",
        header: header(CommandType::AREQ, Subsystem::ZDO, 0xB6),
        class: CommandClass::Callback,
        fields: &[field("Src", FieldKind::U16), STATUS],
        response: None,
    };

    pub static STATE_CHANGE_IND: CommandDef = CommandDef {
        name: "ZDO.StateChangeInd.Callback",
        header: header(CommandType::AREQ, Subsystem::ZDO, 0xC0),
        class: CommandClass::Callback,
        fields: &[field("State", FieldKind::U8)],
        response: None,
    };

    pub static LEAVE_IND: CommandDef = CommandDef {
        name: "ZDO.LeaveInd.Callback",
        header: header(CommandType::AREQ, Subsystem::ZDO, 0xC9),
        class: CommandClass::Callback,
        fields: &[
            field("NWK", FieldKind::U16),
            field("IEEE", FieldKind::U64),
            field("Request", FieldKind::U8),
            field("Remove", FieldKind::U8),
            field("Rejoin", FieldKind::U8),
        ],
        response: None,
    };
}

// ----------------------------------------------------------------------------
// UTIL
// ----------------------------------------------------------------------------

pub mod util {
    use super::*;

    pub static LED_CONTROL: CommandDef = CommandDef {
        name: "UTIL.LEDControl.Req",
        header: header(CommandType::SREQ, Subsystem::UTIL, 0x0A),
        class: CommandClass::Request,
        fields: &[field("LED", FieldKind::U8), field("Mode", FieldKind::U8)],
        response: Some(&LED_CONTROL_RSP),
    };

    pub static LED_CONTROL_RSP: CommandDef = CommandDef {
        name: "UTIL.LEDControl.Rsp",
        header: header(CommandType::SRSP, Subsystem::UTIL, 0x0A),
        class: CommandClass::Response,
        fields: &[STATUS],
        response: None,
    };
}

// ----------------------------------------------------------------------------
// Lookup
// ----------------------------------------------------------------------------

/// Every definition the device may send to the host
pub static INBOUND: &[&CommandDef] = &[
    &sys::PING_RSP,
    &sys::VERSION_RSP,
    &sys::RESET_IND,
    &af::DATA_REQUEST_RSP,
    &af::DATA_CONFIRM,
    &af::INCOMING_MSG,
    &zdo::STARTUP_FROM_APP_RSP,
    &zdo::MGMT_PERMIT_JOIN_REQ_RSP,
    &zdo::MGMT_PERMIT_JOIN_RSP,
    &zdo::STATE_CHANGE_IND,
    &zdo::LEAVE_IND,
    &util::LED_CONTROL_RSP,
];

/// Every request the host may send to the device
pub static OUTBOUND: &[&CommandDef] = &[
    &sys::PING_REQ,
    &sys::VERSION_REQ,
    &sys::RESET_REQ,
    &af::DATA_REQUEST,
    &zdo::STARTUP_FROM_APP,
    &zdo::MGMT_PERMIT_JOIN_REQ,
    &util::LED_CONTROL,
];

/// Find the response or callback definition carried under `header`
pub fn lookup_inbound(header: CommandHeader) -> Option<&'static CommandDef> {
    INBOUND.iter().copied().find(|def| def.header == header)
}

/// Find the request definition carried under `header`
pub fn lookup_outbound(header: CommandHeader) -> Option<&'static CommandDef> {
    OUTBOUND.iter().copied().find(|def| def.header == header)
}
