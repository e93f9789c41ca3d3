use super::*;

fn teacher() -> Identity {
    Identity::new("T1", Role::Teacher)
}

fn student() -> Identity {
    Identity::new("S1", Role::Student)
}

#[test]
fn anonymous_is_not_authenticated_for_every_access() {
    let conn = Uuid::new_v4();
    let member = Access::Member { registered: Some(conn), connection_id: conn };
    for access in [Access::Authenticated, Access::Teacher, Access::OnBehalfOf("S1"), member] {
        assert_eq!(check(None, access), Err(AccessError::NotAuthenticated));
    }
}

#[test]
fn any_identity_passes_authenticated() {
    assert!(check(Some(&teacher()), Access::Authenticated).is_ok());
    assert!(check(Some(&student()), Access::Authenticated).is_ok());
}

#[test]
fn only_teachers_pass_teacher_access() {
    let t = teacher();
    assert_eq!(check(Some(&t), Access::Teacher).map(|i| i.user_id.as_str()), Ok("T1"));
    assert_eq!(check(Some(&student()), Access::Teacher), Err(AccessError::NotAuthorized));
}

#[test]
fn students_act_only_for_themselves() {
    let s = student();
    assert!(check(Some(&s), Access::OnBehalfOf("S1")).is_ok());
    assert_eq!(check(Some(&s), Access::OnBehalfOf("S2")), Err(AccessError::NotAuthorized));
    assert!(check(Some(&teacher()), Access::OnBehalfOf("S2")).is_ok());
}

#[test]
fn students_act_only_in_sessions_this_connection_joined() {
    let s = student();
    let conn = Uuid::new_v4();

    assert!(check(Some(&s), Access::Member { registered: Some(conn), connection_id: conn }).is_ok());
    assert_eq!(
        check(Some(&s), Access::Member { registered: None, connection_id: conn }),
        Err(AccessError::NotMember)
    );
    assert_eq!(
        check(Some(&s), Access::Member { registered: Some(Uuid::new_v4()), connection_id: conn }),
        Err(AccessError::NotMember),
        "an entry owned by another connection does not count"
    );
}

#[test]
fn teachers_act_across_sessions() {
    let access = Access::Member { registered: None, connection_id: Uuid::new_v4() };
    assert!(check(Some(&teacher()), access).is_ok());
}

#[test]
fn rejection_messages_match_wire_contract() {
    use crate::frame::ErrorCode;

    assert_eq!(AccessError::NotAuthenticated.to_string(), "not authenticated");
    assert_eq!(AccessError::NotAuthorized.to_string(), "not authorized");
    assert_eq!(AccessError::NotMember.to_string(), "not a member of this session");
    assert_eq!(AccessError::NotMember.error_code(), "E_NOT_MEMBER");
}
