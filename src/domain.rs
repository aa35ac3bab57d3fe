use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;

/// Kind of a points history row. Stored as upper-case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Purchase,
    Usage,
    Refund,
    AdminAdjustment,
    RolloverExpired,
}

impl HistoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryKind::Purchase => "PURCHASE",
            HistoryKind::Usage => "USAGE",
            HistoryKind::Refund => "REFUND",
            HistoryKind::AdminAdjustment => "ADMIN_ADJUSTMENT",
            HistoryKind::RolloverExpired => "ROLLOVER_EXPIRED",
        }
    }

    /// Credits of these kinds count towards `total_purchased`.
    pub fn counts_as_purchase(self) -> bool {
        matches!(self, HistoryKind::Purchase | HistoryKind::AdminAdjustment)
    }
}

impl FromStr for HistoryKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASE" => Ok(HistoryKind::Purchase),
            "USAGE" => Ok(HistoryKind::Usage),
            "REFUND" => Ok(HistoryKind::Refund),
            "ADMIN_ADJUSTMENT" => Ok(HistoryKind::AdminAdjustment),
            "ROLLOVER_EXPIRED" => Ok(HistoryKind::RolloverExpired),
            other => Err(CoreError::Internal(format!("unknown history kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Processing,
    Ready,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Ready => "READY",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Ready | OrderStatus::Failed | OrderStatus::Refunded)
    }

    /// Provider-driven lifecycle. `Refunded` is only reachable from `Failed`;
    /// an admin refund of a READY order writes `Failed` first.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Ready) | (Pending, Failed) | (Processing, Ready) | (Processing, Failed) | (Failed, Refunded)
        )
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "READY" => Ok(OrderStatus::Ready),
            "FAILED" => Ok(OrderStatus::Failed),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(CoreError::Internal(format!("unknown order status {other}"))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalKind {
    PointsAdjust,
    OrderRefund,
}

impl ApprovalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalKind::PointsAdjust => "POINTS_ADJUST",
            ApprovalKind::OrderRefund => "ORDER_REFUND",
        }
    }

    pub fn resource_type(self) -> &'static str {
        match self {
            ApprovalKind::PointsAdjust => "user",
            ApprovalKind::OrderRefund => "order",
        }
    }
}

impl FromStr for ApprovalKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POINTS_ADJUST" => Ok(ApprovalKind::PointsAdjust),
            "ORDER_REFUND" => Ok(ApprovalKind::OrderRefund),
            other => Err(CoreError::Internal(format!("unknown approval kind {other}"))),
        }
    }
}

/// `Canceled` is the closed marker: approved and executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Canceled,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Canceled => "CANCELED",
        }
    }
}

impl FromStr for ApprovalStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ApprovalStatus::Pending),
            "APPROVED" => Ok(ApprovalStatus::Approved),
            "REJECTED" => Ok(ApprovalStatus::Rejected),
            "CANCELED" => Ok(ApprovalStatus::Canceled),
            _ => Err(CoreError::BadRequest("status".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn resulting_status(self) -> ApprovalStatus {
        match self {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Decision::Approve),
            "reject" => Ok(Decision::Reject),
            _ => Err(CoreError::BadRequest("action".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Ready,
        OrderStatus::Failed,
        OrderStatus::Refunded,
    ];

    #[test]
    fn test_refunded_only_after_failed() {
        for from in ALL {
            let allowed = from.can_transition_to(OrderStatus::Refunded);
            assert_eq!(allowed, from == OrderStatus::Failed, "from {from}");
        }
    }

    #[test]
    fn test_ready_never_after_terminal() {
        for from in [OrderStatus::Ready, OrderStatus::Failed, OrderStatus::Refunded] {
            assert!(!from.can_transition_to(OrderStatus::Ready), "from {from}");
            assert!(!from.can_transition_to(OrderStatus::Processing), "from {from}");
        }
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("COMPLETED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_purchase_counting_kinds() {
        assert!(HistoryKind::Purchase.counts_as_purchase());
        assert!(HistoryKind::AdminAdjustment.counts_as_purchase());
        assert!(!HistoryKind::Refund.counts_as_purchase());
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!("approve".parse::<Decision>().unwrap().resulting_status(), ApprovalStatus::Approved);
        assert_eq!("reject".parse::<Decision>().unwrap().resulting_status(), ApprovalStatus::Rejected);
        assert!("maybe".parse::<Decision>().is_err());
    }
}
