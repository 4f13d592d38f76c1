//! Function-code catalogue
//!
//! The 16-bit function code selects the body layout of a message. The set of
//! codes is closed; anything not listed here is still carried as a raw `u16`
//! by the header and reported as unknown by the registry.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// Known CDEF function codes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionCode {
    // Session supervision
    Heartbeat = 0x0310,
    ListActiveClubs = 0x0319,

    // Selling
    SellTicket = 0x0403,
    CostInquiry = 0x0404,
    MysteryBet = 0x0409,
    CancelTransaction = 0x0415,
    TracksideSellTicket = 0x0416,
    TracksidePrintResultsTicket = 0x0419,
    TracksideGameStatus = 0x041A,
    TracksideGameNumbersInquiry = 0x041B,

    // Operator
    SignOn = 0x0603,
    SignOff = 0x0604,
    OperatorBalance = 0x060B,
    AdSignOn = 0x0630,
    CmsMessage = 0x0634,

    // Accounts
    AccessAccount = 0x0D0B,
    AccountBalance = 0x0D10,
    LastBet = 0x0D11,
    CombPayRedeem = 0x0D18,
    EndOfRacedayNotify = 0x0D4F,
    CashIn = 0x0E03,
    CashOut = 0x0E04,
    OcmMeetingTotal = 0x0E07,
    OcmOpenCloseCash = 0x0E08,

    // Host information
    TransactionLocation = 0x1319,
    Via = 0x131A,
    RacedayId = 0x1322,

    // Racing results database
    RldbSnQuery = 0x1608,
    RldbMeetingHeadingsSn = 0x1609,
    RldbRaceHeadingsSn = 0x160A,
    RldbContestantsSn = 0x160B,
    RldbMeetingInformationSentSn = 0x160C,
    RldbMultilegDividendsSn = 0x160D,
    RldbTrackNWeatherSn = 0x160E,
    RldbMultilegApproximatesSn = 0x160F,
    RldbCancelMeetingSn = 0x1610,
    RldbAbandonEventSn = 0x1611,
    RldbReinstateEventSn = 0x1612,
    RldbAmendEventStartTime = 0x1613,
    RldbCloseSellSn = 0x1614,
    RldbOpenSellSn = 0x1615,
    RldbEventSubstituteSn = 0x1616,
    RldbWinPlaceApproximatesSn = 0x1617,
    RldbMultiPositionalEventsApproximatesSn = 0x1618,
    RldbEventResultsSn = 0x1619,
    RldbEventDividendsSn = 0x161A,
    RldbAnnounceDividendsSn = 0x161B,
    RldbScratchingsReinstatementsSn = 0x161C,
    RldbFinalScratchingsSn = 0x161D,
    RldbContestantsRsbSn = 0x161E,
    RldbRequestPreviousDaysResults = 0x161F,
    RldbPreviousDaysResults = 0x1620,
    RldbRequestResultsSnRange = 0x1621,
    RldbPreviousDaysResultsData = 0x1622,
    RldbRequestUnsequenced = 0x1623,
    RldbSnNotification = 0x1624,
    RldbSnRequest = 0x1625,
    RldbMysteryProductDividend = 0x1626,
    RldbMultilegApproximatesWithJackpot = 0x1629,
    RldbApproxTimeToJump = 0x162B,
    RldbPreviousDaysResultsEx = 0x16E0,
    RldbReqMultiplePrevDaysResults = 0x16E1,

    // File transfer and node management
    FileStatusRequest = 0x1801,
    FileStatusResponse = 0x1802,
    FileDownloadRequest = 0x1803,
    FileDownloadData = 0x1804,
    FileUploadRequest = 0x1805,
    FileUploadData = 0x1806,
    FileDelete = 0x1807,
    WisnetGetConfigValues = 0x1808,
    WisnetSetConfig = 0x1809,
    WisnetGetConfigKeys = 0x180A,
    AddFileAuditRecord = 0x180B,
    GetFileAuditRecord = 0x180C,
    FileDeleteFileset = 0x180D,
    FileFilesetStatus = 0x180E,
    WisnetInternalCommand = 0x180F,
    WisnetApplicationState = 0x1810,
    WisnetEndpoint = 0x1811,
    WisnetTimeToSend = 0x1812,
    WisnetSetThrottle = 0x1813,
    WisnetRcySkyIdentification = 0x1814,
    WisnetSkyMasterStatus = 0x1815,
    WisnetSkyFlush = 0x1816,
    WisnetOptionRequest = 0x1817,

    // Sportsbet
    SbInformationUpdate = 0x3103,
    SbSnNotification = 0x3106,
    SbSnQuery = 0x3107,
    SbSnRequest = 0x3108,
    SbrSnResult = 0x3180,
    SbrSnCancelResult = 0x3181,
    SbrPreviousDaysResults = 0x31A0,
    SbrSnNotificationRequest = 0x31D0,
    SbrSnNotification = 0x31D1,
    SbrRequestPreviousDaysResults = 0x31D2,
    SbrPreviousDaysResultsSnRange = 0x31D3,
    SbrTodaysSnQuery = 0x31D4,
    SbrRequestPreviousDaysResultsSnRange = 0x31D5,

    // Trackside
    TracksideTodaysSnQuery = 0x3208,
    TracksideResultSn = 0x3219,
    TracksideRequestPreviousDaysResults = 0x321F,
    TracksidePreviousDaysResultsSnRange = 0x3220,
    TracksideRequestPreviousDaysResultsSnRange = 0x3221,
    TracksidePreviousDaysResults = 0x3222,
    TracksideSnNotification = 0x3224,
    TracksideSnNotificationRequest = 0x3225,

    // Network and session establishment
    NetworkEstablishmentDeviceNotification = 0x3306,
    NetworkEstablishmentGetEntityIpAddr = 0x3307,
    SessionEstablishmentConnect = 0x3308,
    SessionEstablishmentDisconnect = 0x3309,
    LinkCapacity = 0x3310,
    FlowControlState = 0x3311,
    FlowControlQuery = 0x3312,
    NetworkEstablishmentGetBroadcastSettings = 0x3313,
    StartOfRacedayNotify = 0x3316,

    // Footy results
    FrRequestMultiplePreviousRoundsResults = 0x3401,
    FrPreviousDaysResultsSnRange = 0x3402,
    FrRequestResultsSnRange = 0x3403,
    FrPreviousDaysResultData = 0x3404,
    FrResultSn = 0x3405,
    FrRoundInformationSummary = 0x3406,
    FrTodaySeqNotification = 0x3408,
    FrTodaySeqNotificationReq = 0x3409,
    FrTodaySeqNumQuery = 0x340A,

    EndOfOncourseMeetingNotify = 0x3806,
    Notify = 0x4002,

    // Internet betting
    IbiMessagePacket = 0x5010,
    IbsSystemStatus = 0x5100,
}

impl FunctionCode {
    /// Raw wire value
    pub fn code(self) -> u16 {
        self.into()
    }

    /// Codes handled by the session layer rather than the application
    pub fn is_session_management(self) -> bool {
        matches!(
            self,
            FunctionCode::Heartbeat
                | FunctionCode::SessionEstablishmentConnect
                | FunctionCode::SessionEstablishmentDisconnect
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:04X})", self, self.code())
    }
}

/// Renders a raw code through the catalogue when it is known
pub fn describe(code: u16) -> String {
    match FunctionCode::try_from(code) {
        Ok(known) => known.to_string(),
        Err(_) => format!("Unknown(0x{code:04X})"),
    }
}
