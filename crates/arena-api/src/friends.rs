//! Friend requests and friendships.
//!
//! A pending request from A to B is A's id in `friendrequest:<B>`, scored by
//! send time in milliseconds. A friendship is two entries, B in `friends:<A>`
//! and A in `friends:<B>`, scored by acceptance time.
//!
//! Accepting touches three keys in sequence and is best effort, not
//! transactional. The pending entry is claimed first with an atomic remove,
//! so of two concurrent responses only one proceeds; the friendship entries
//! are insert-if-absent, so replaying them never changes anything. If the
//! friendship write fails the claimed request is put back.

use std::str::FromStr;

use anyhow::{Context, anyhow};
use axum::{
    Extension, Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use arena_db::{Database, keys};
use arena_types::api::{
    Envelope, FriendDetails, FriendRequestDetails, PageQuery, RespondFriendRequest,
    SendFriendRequest,
};

use crate::accounts;
use crate::auth::{AppState, run_blocking};
use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::paging::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl FromStr for Decision {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            _ => Err(ApiError::InvalidArgument("Invalid status".into())),
        }
    }
}

fn timestamp_score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64
}

fn score_timestamp(score: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(score as i64)
}

/// Queue a request from `requester` to `target`. Sending again only
/// refreshes the timestamp.
pub fn send_request(db: &Database, requester: i64, target: i64) -> ApiResult<()> {
    if requester == target {
        return Err(ApiError::InvalidArgument("Cannot send friend request to oneself.".into()));
    }

    if !db.exists(&keys::user(target)).context("checking target account")? {
        return Err(ApiError::NotFound("Target user does not exist.".into()));
    }

    let sent_at = timestamp_score(db.clock().now());
    let fresh = db
        .zadd(&keys::friend_requests(target), &requester.to_string(), sent_at)
        .context("queueing friend request")?;

    if fresh {
        info!("Friend request {} -> {}", requester, target);
    } else {
        info!("Friend request {} -> {} re-sent", requester, target);
    }
    Ok(())
}

/// Pending requests addressed to `target`, oldest first. Every requester must
/// resolve to a readable account or the whole page fails.
pub fn list_requests(db: &Database, target: i64, page: Page) -> ApiResult<Vec<FriendRequestDetails>> {
    let entries = db
        .zrange_with_scores(&keys::friend_requests(target), page.offset(), page.count)
        .context("reading friend requests")?;

    let mut requests = Vec::with_capacity(entries.len());
    for entry in entries {
        let requester: i64 = entry
            .member
            .parse()
            .with_context(|| format!("Malformed requester '{}' pending for {}", entry.member, target))?;

        let account = accounts::load(db, requester)?.ok_or_else(|| {
            anyhow!("Account {} with a pending request for {} does not exist", requester, target)
        })?;

        let date = score_timestamp(entry.score)
            .ok_or_else(|| anyhow!("Request timestamp {} out of range", entry.score))?;

        requests.push(FriendRequestDetails {
            user_id: requester,
            username: account.username,
            date,
        });
    }

    Ok(requests)
}

/// Resolve the pending request from `requester` to `target`.
pub fn respond(db: &Database, target: i64, requester: i64, decision: Decision) -> ApiResult<()> {
    let pending_key = keys::friend_requests(target);
    let member = requester.to_string();

    let sent_at = db.zscore(&pending_key, &member).context("reading friend request")?;
    let claimed = db.zrem(&pending_key, &member).context("claiming friend request")?;
    if !claimed {
        return Err(ApiError::NotFound("Friend request not found".into()));
    }
    // No score means the request arrived between the read and the claim.
    let sent_at = sent_at.unwrap_or_else(|| timestamp_score(db.clock().now()));

    match decision {
        Decision::Reject => {
            info!("Friend request {} -> {} rejected", requester, target);
            Ok(())
        }
        Decision::Accept => {
            let since = timestamp_score(db.clock().now());
            if let Err(e) = befriend(db, target, requester, since) {
                // Put the request back so the answer can be retried.
                match db.zadd_nx(&pending_key, &member, sent_at) {
                    Ok(_) => warn!(
                        "Friend request {} -> {} restored after failed accept: {:#}",
                        requester, target, e
                    ),
                    Err(restore) => error!(
                        "Friend request {} -> {} consumed but friendship not fully written; needs reconciliation: {:#} (restore failed: {:#})",
                        requester, target, e, restore
                    ),
                }
                return Err(e.into());
            }

            // A crossed request in the other direction is settled by this one.
            let crossed = db
                .zrem(&keys::friend_requests(requester), &target.to_string())
                .context("clearing crossed friend request")?;
            if crossed {
                info!("Cleared crossed friend request {} -> {}", target, requester);
            }

            info!("Friend request {} -> {} accepted", requester, target);
            Ok(())
        }
    }
}

fn befriend(db: &Database, a: i64, b: i64, since: f64) -> anyhow::Result<()> {
    let a_side = db.zadd_nx(&keys::friends(a), &b.to_string(), since)?;
    let b_side = db.zadd_nx(&keys::friends(b), &a.to_string(), since)?;

    if a_side != b_side {
        warn!("Completed one-sided friendship between {} and {}", a, b);
    }
    Ok(())
}

/// Friends of `account`, in the order the friendships were made. Friends
/// whose account cannot be read are left out of the page.
pub fn list_friends(db: &Database, account: i64, page: Page) -> ApiResult<Vec<FriendDetails>> {
    let entries = db
        .zrange_with_scores(&keys::friends(account), page.offset(), page.count)
        .context("reading friends")?;

    let mut friends = Vec::with_capacity(entries.len());
    for entry in entries {
        let Ok(friend) = entry.member.parse::<i64>() else {
            warn!("Skipping malformed friend '{}' of {}", entry.member, account);
            continue;
        };

        match accounts::load(db, friend) {
            Ok(Some(found)) => friends.push(FriendDetails {
                user_id: friend,
                username: found.username,
            }),
            Ok(None) => warn!("Skipping missing friend {} of {}", friend, account),
            Err(e) => warn!("Skipping unreadable friend {} of {}: {}", friend, account, e),
        }
    }

    Ok(friends)
}

// -- Handlers --

/// POST /friendship/friendrequest
pub async fn send_friend_request(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<SendFriendRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<&'static str>>> {
    let Json(req) = body?;
    run_blocking(&state, move |db| send_request(db, caller.account_id, req.userid)).await?;
    Ok(Json(Envelope::ok("Friend request sent")))
}

/// GET /friendship/friendrequestlist?page=&count=
pub async fn list_friend_requests(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<Vec<FriendRequestDetails>>>> {
    let Query(query) = query?;
    let page = Page::strict(&query)?;
    let requests = run_blocking(&state, move |db| list_requests(db, caller.account_id, page)).await?;
    Ok(Json(Envelope::ok(requests)))
}

/// POST /friendship/respondrequest
pub async fn respond_to_friend_request(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<RespondFriendRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<&'static str>>> {
    let Json(req) = body?;
    let decision: Decision = req.status.parse()?;
    run_blocking(&state, move |db| respond(db, caller.account_id, req.requester_id, decision)).await?;
    Ok(Json(Envelope::ok("Friend request processed")))
}

/// GET /friendship/friendlist?page=&count=
pub async fn list_friends_page(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<Vec<FriendDetails>>>> {
    let Query(query) = query?;
    let page = Page::strict(&query)?;
    let friends = run_blocking(&state, move |db| list_friends(db, caller.account_id, page)).await?;
    Ok(Json(Envelope::ok(friends)))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing;

    const FIRST_PAGE: Page = Page { page: 1, count: 10 };

    fn friend_ids(db: &Database, account: i64) -> Vec<i64> {
        list_friends(db, account, FIRST_PAGE)
            .unwrap()
            .into_iter()
            .map(|f| f.user_id)
            .collect()
    }

    #[test]
    fn decision_parsing() {
        assert_eq!("accept".parse::<Decision>().unwrap(), Decision::Accept);
        assert_eq!("reject".parse::<Decision>().unwrap(), Decision::Reject);
        assert!(matches!("Accept".parse::<Decision>(), Err(ApiError::InvalidArgument(_))));
    }

    #[test]
    fn self_request_is_rejected() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        assert!(matches!(send_request(&db, a, a), Err(ApiError::InvalidArgument(_))));
    }

    #[test]
    fn request_to_unknown_account_is_not_found() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        assert!(matches!(send_request(&db, a, 999), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn resend_refreshes_instead_of_duplicating() {
        let (db, clock) = testing::db_with_clock();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");

        send_request(&db, a, b).unwrap();
        let first = list_requests(&db, b, FIRST_PAGE).unwrap();

        clock.advance(Duration::minutes(5));
        send_request(&db, a, b).unwrap();
        let second = list_requests(&db, b, FIRST_PAGE).unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].user_id, a);
        assert_eq!(second[0].username, "a");
        assert_eq!(second[0].date - first[0].date, Duration::minutes(5));
    }

    #[test]
    fn requests_are_listed_oldest_first_and_paged() {
        let (db, clock) = testing::db_with_clock();
        let target = testing::seed_account(&db, "target");
        let mut senders = Vec::new();
        for name in ["s1", "s2", "s3"] {
            let id = testing::seed_account(&db, name);
            send_request(&db, id, target).unwrap();
            clock.advance(Duration::seconds(1));
            senders.push(id);
        }

        let page_one = list_requests(&db, target, Page { page: 1, count: 2 }).unwrap();
        let page_two = list_requests(&db, target, Page { page: 2, count: 2 }).unwrap();
        let page_three = list_requests(&db, target, Page { page: 3, count: 2 }).unwrap();

        let ids: Vec<i64> = page_one.iter().chain(&page_two).map(|r| r.user_id).collect();
        assert_eq!(ids, senders);
        assert!(page_three.is_empty());
    }

    #[test]
    fn listing_fails_when_a_requester_cannot_be_resolved() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");
        send_request(&db, a, b).unwrap();

        db.set(&keys::user(a), "garbage").unwrap();
        assert!(matches!(list_requests(&db, b, FIRST_PAGE), Err(ApiError::Internal(_))));

        db.del(&keys::user(a)).unwrap();
        assert!(matches!(list_requests(&db, b, FIRST_PAGE), Err(ApiError::Internal(_))));
    }

    #[test]
    fn accept_creates_mutual_friendship_once() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");

        send_request(&db, a, b).unwrap();
        respond(&db, b, a, Decision::Accept).unwrap();

        assert_eq!(friend_ids(&db, a), vec![b]);
        assert_eq!(friend_ids(&db, b), vec![a]);
        assert!(list_requests(&db, b, FIRST_PAGE).unwrap().is_empty());

        assert!(matches!(respond(&db, b, a, Decision::Accept), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn reject_only_drops_the_request() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");

        send_request(&db, a, b).unwrap();
        respond(&db, b, a, Decision::Reject).unwrap();

        assert!(list_requests(&db, b, FIRST_PAGE).unwrap().is_empty());
        assert!(friend_ids(&db, a).is_empty());
        assert!(friend_ids(&db, b).is_empty());
    }

    #[test]
    fn respond_without_request_is_not_found() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");
        assert!(matches!(respond(&db, b, a, Decision::Reject), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn accepting_settles_crossed_request() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");

        send_request(&db, a, b).unwrap();
        send_request(&db, b, a).unwrap();
        respond(&db, b, a, Decision::Accept).unwrap();

        assert!(list_requests(&db, a, FIRST_PAGE).unwrap().is_empty());
        assert!(matches!(respond(&db, a, b, Decision::Accept), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn concurrent_accepts_apply_once() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");
        send_request(&db, a, b).unwrap();

        let db = &db;
        let outcomes: Vec<bool> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(move || respond(db, b, a, Decision::Accept).is_ok()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(friend_ids(&db, a), vec![b]);
        assert_eq!(friend_ids(&db, b), vec![a]);
    }

    #[test]
    fn failed_accept_puts_the_request_back() {
        let (db, clock) = testing::db_with_clock();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");
        send_request(&db, a, b).unwrap();
        let sent = db.zscore(&keys::friend_requests(b), &a.to_string()).unwrap();
        clock.advance(Duration::minutes(1));

        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_friends BEFORE INSERT ON zsets
                 WHEN NEW.key LIKE 'friends:%'
                 BEGIN SELECT RAISE(ABORT, 'friends unavailable'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(respond(&db, b, a, Decision::Accept), Err(ApiError::Internal(_))));
        assert_eq!(db.zscore(&keys::friend_requests(b), &a.to_string()).unwrap(), sent);

        db.with_conn(|conn| {
            conn.execute_batch("DROP TRIGGER reject_friends;")?;
            Ok(())
        })
        .unwrap();

        respond(&db, b, a, Decision::Accept).unwrap();
        assert_eq!(friend_ids(&db, a), vec![b]);
        assert_eq!(friend_ids(&db, b), vec![a]);
    }

    #[test]
    fn one_sided_friendship_is_completed_on_accept() {
        let db = testing::db();
        let a = testing::seed_account(&db, "a");
        let b = testing::seed_account(&db, "b");
        db.zadd(&keys::friends(a), &b.to_string(), 1.0).unwrap();

        send_request(&db, a, b).unwrap();
        respond(&db, b, a, Decision::Accept).unwrap();

        assert_eq!(friend_ids(&db, a), vec![b]);
        assert_eq!(friend_ids(&db, b), vec![a]);
        // The surviving side keeps its original timestamp.
        assert_eq!(db.zscore(&keys::friends(a), &b.to_string()).unwrap(), Some(1.0));
    }

    #[test]
    fn friend_listing_skips_unresolvable_friends() {
        let (db, clock) = testing::db_with_clock();
        let me = testing::seed_account(&db, "me");
        let gone = testing::seed_account(&db, "gone");
        let broken = testing::seed_account(&db, "broken");
        let fine = testing::seed_account(&db, "fine");

        for friend in [gone, broken, fine] {
            send_request(&db, friend, me).unwrap();
            respond(&db, me, friend, Decision::Accept).unwrap();
            clock.advance(Duration::seconds(1));
        }

        db.del(&keys::user(gone)).unwrap();
        db.set(&keys::user(broken), "{").unwrap();

        let friends = list_friends(&db, me, FIRST_PAGE).unwrap();
        assert_eq!(
            friends,
            vec![FriendDetails {
                user_id: fine,
                username: "fine".into()
            }]
        );
    }
}
