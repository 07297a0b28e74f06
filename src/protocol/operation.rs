//! Closed set of protocol operations and their protocol ids.

use std::fmt;
use std::str::FromStr;

use crate::common::ClientError;

macro_rules! operations {
    ($($variant:ident => $pid:literal),+ $(,)?) => {
        /// Every request/response action the server exposes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operation {
            $($variant),+
        }

        impl Operation {
            pub const ALL: &'static [Operation] = &[$(Operation::$variant),+];

            /// Protocol id used as the discovery key and envelope `pid`.
            pub const fn pid(self) -> &'static str {
                match self {
                    $(Operation::$variant => $pid),+
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Operation::$variant => stringify!($variant)),+
                }
            }
        }
    };
}

operations! {
    Login => "P076",
    AttachFileInfo => "P002",
    AttachFileSend => "P003",
    MainCount => "P062",
    UpdatePush => "P015",
    UpdatePushRegId => "P016",
    AttachFileUpload => "P063",
    AttachFileDownload => "P084",
    AttachFileSave => "P085",
    UpdateUserImg => "P019",
    UpdatePasswd => "P020",
    UpdateMainComp => "P021",
    SearchRoomList => "P077",
    InsertRoom => "P078",
    ChatSend => "P079",
    RoomDetail => "P080",
    SearchChatList => "P081",
    ChatList => "P082",
    SearchProjectRoomList => "P083",
    ChatReadUserList => "P086",
    RoomIn => "P087",
    RoomOut => "P088",
    RoomTitleUpdate => "P089",
    RoomAlarm => "P090",
    ChatDelete => "P091",
    MyGroupList => "P092",
    MyGroupInsert => "P093",
    MyGroupUpdate => "P094",
    MyGroupDelete => "P095",
    MyGroupMemberInsert => "P096",
    MyGroupMemberDelete => "P097",
    SearchRoomInfo => "P169",
    RoomCheck => "P190",
    MsgLinkVer => "P207",
    MsgLinkList => "P208",
    MsgLinkToken => "P209",
    AlertCount => "P187",
    AlertList => "P188",
    AlertRead => "P189",
    MessageUnReadCnt => "P244",
    MessageList => "P245",
    MessageDetail => "P246",
    SendMessage => "P247",
    MessageDelete => "P248",
    MessageRead => "P249",
    MessageRecvList => "P284",
    MessageMark => "P285",
    DirectDownload => "P293",
    SearchNoticeList => "P294",
    MessageCancel => "P319",
    ClientInfoList => "P322",
    ClientInfoUpdate => "P323",
    SearchRoomListByRoomName => "P326",
    RoomMark => "P327",
    RoomMarkNew => "P331",
    ChatRead => "P342",
    RoomFileList => "P344",
    RoomReceiverList => "P346",
    AlertCntNew => "P355",
    AlertListNew => "P356",
    AlertReadNew => "P357",
    AlertReadAllNew => "P360",
    LadderLoadGame => "P396",
    LadderLoadResult => "P397",
    ReserveMessageStatus => "P402",
    AllChatClear => "P408",
    SearchPersonnelCardInfo => "P426",
    RoomPinUpYn => "P416",
    TalkChatInfo => "P436",
    VTalkUrl => "P477",
    MessageCollect => "P511",
    TalkMessageCollect => "P461",
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.pid())
    }
}

/// Accepts either the operation name (`ChatSend`) or its protocol id (`P079`).
impl FromStr for Operation {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(wanted) || op.pid() == wanted)
            .ok_or_else(|| ClientError::UnknownOperation(wanted.to_string()))
    }
}
