use std::collections::HashSet;

use actix_web::HttpRequest;
use diesel::PgConnection;

use crate::database::users;
use crate::errors::CoreError;

pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    PlaceOrder,
    ViewOwnAccount,
    ViewAnyAccount,
    AdjustPoints,
    RefundOrders,
    GrantRollovers,
    ViewApprovals,
    DecideApprovals,
    ExecuteApprovals,
    ManageSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Support,
    Admin,
    Owner,
}

impl Role {
    pub fn parse(role: &str) -> Option<Role> {
        match role {
            "user" => Some(Role::User),
            "support" => Some(Role::Support),
            "admin" => Some(Role::Admin),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }

    pub fn capabilities(self) -> HashSet<Permission> {
        use Permission::*;
        let mut caps: HashSet<Permission> = [PlaceOrder, ViewOwnAccount].into_iter().collect();
        if matches!(self, Role::Support | Role::Admin | Role::Owner) {
            caps.extend([ViewAnyAccount, ViewApprovals]);
        }
        if matches!(self, Role::Admin | Role::Owner) {
            caps.extend([AdjustPoints, RefundOrders, GrantRollovers, DecideApprovals, ExecuteApprovals]);
        }
        if self == Role::Owner {
            caps.insert(ManageSettings);
        }
        caps
    }
}

/// The caller of a request with the capability set of its role.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub capabilities: HashSet<Permission>,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            capabilities: role.capabilities(),
        }
    }

    /// Own-account reads need `ViewOwnAccount`, anyone else's `ViewAnyAccount`.
    pub fn can_view_account(&self, user_id: &str) -> bool {
        if self.id == user_id {
            has_capability(self, Permission::ViewOwnAccount)
        } else {
            has_capability(self, Permission::ViewAnyAccount)
        }
    }
}

pub fn has_capability(actor: &Actor, permission: Permission) -> bool {
    actor.capabilities.contains(&permission)
}

pub fn require(actor: &Actor, permission: Permission) -> Result<(), CoreError> {
    if has_capability(actor, permission) {
        Ok(())
    } else {
        Err(CoreError::Forbidden(format!("{permission:?} is required")))
    }
}

pub fn actor_id(req: &HttpRequest) -> Result<String, CoreError> {
    req.headers()
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(CoreError::Unauthorized)
}

// unknown actors are unauthorized, never treated as plain users
pub fn load_actor(conn: &mut PgConnection, actor_id: &str) -> Result<Actor, CoreError> {
    let user = users::load_user(conn, actor_id)?.ok_or(CoreError::Unauthorized)?;
    let role = Role::parse(&user.role).ok_or(CoreError::Unauthorized)?;
    Ok(Actor::new(user.id, role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_role_capabilities() {
        let user = Actor::new("u1", Role::User);
        assert!(has_capability(&user, Permission::PlaceOrder));
        assert!(!has_capability(&user, Permission::AdjustPoints));
        assert!(user.can_view_account("u1"));
        assert!(!user.can_view_account("u2"));

        let support = Actor::new("s1", Role::Support);
        assert!(support.can_view_account("u2"));
        assert!(!has_capability(&support, Permission::DecideApprovals));

        let admin = Actor::new("a1", Role::Admin);
        assert!(has_capability(&admin, Permission::RefundOrders));
        assert!(has_capability(&admin, Permission::ExecuteApprovals));
        assert!(!has_capability(&admin, Permission::ManageSettings));
        assert!(has_capability(&Actor::new("o1", Role::Owner), Permission::ManageSettings));
    }

    #[test]
    fn test_require() {
        let user = Actor::new("u1", Role::User);
        assert!(require(&user, Permission::PlaceOrder).is_ok());
        assert!(matches!(require(&user, Permission::RefundOrders), Err(CoreError::Forbidden(_))));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn test_actor_header() {
        let req = TestRequest::default().insert_header((ACTOR_HEADER, " admin-1 ")).to_http_request();
        assert_eq!(actor_id(&req).unwrap(), "admin-1");
        let req = TestRequest::default().to_http_request();
        assert!(matches!(actor_id(&req), Err(CoreError::Unauthorized)));
    }
}
