use cucumber::{gherkin::Step, given, then, when};
use ledger_common::Points;
use point_ledger_engine::{
    db_types::{cell_at, Cell, MemberKey, NewAuctionItem, Row},
    gate::{EditEvent, RecomputeTarget, Skipped},
    ledger_api::TriggerOutcome,
    sheets::{item_cols, ledger_cols, ARCHIVE_TABLE, ITEMS_HEADER, ITEMS_TABLE, LEDGER_TABLE},
    traits::TabularDatastore,
    LedgerError,
};

use crate::cucumber::LedgerWorld;

const EDITED_ATTENDANCE_TABLE: &str = "ATTENDANCE_WEEK_20251005";

fn item_row(id: &str, item: &str, price: Option<i64>, winner: &str) -> Row {
    let mut row = vec![Cell::Empty; ITEMS_HEADER.len()];
    row[item_cols::ID] = Cell::from(id);
    row[item_cols::ITEM] = Cell::from(item);
    if let Some(price) = price {
        row[item_cols::START_PRICE] = Cell::Int(price);
    }
    row[item_cols::WINNER] = Cell::from(winner);
    row
}

fn id_list(list: &str) -> Vec<String> {
    list.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

//----------------------------------------------   Setup   ----------------------------------------------------
#[given(expr = "the boss {string} is worth {int} points")]
async fn boss_is_worth(world: &mut LedgerWorld, boss: String, points: i64) {
    world.bosses.push((boss, Points::from(points)));
}

#[given(expr = "a fresh ledger")]
async fn fresh_ledger(world: &mut LedgerWorld) {
    world.start().await;
}

#[given(expr = "the ledger lists the member {string}")]
async fn ledger_lists_member(world: &mut LedgerWorld, name: String) {
    world.system().ledger.add_member(&name).await.expect("Error adding member");
}

#[given(expr = "the working table holds the items:")]
async fn working_table_holds(world: &mut LedgerWorld, step: &Step) {
    let table = step.table.as_ref().expect("The step needs a data table");
    let db = world.system().ledger.db().clone();
    for row in table.rows.iter().skip(1) {
        let row = item_row(&row[0], &row[1], None, &row[2]);
        db.append_row(ITEMS_TABLE, row).await.expect("Error seeding the working table");
    }
}

#[given(expr = "the archive holds {string} sold at {int} points")]
async fn archive_holds(world: &mut LedgerWorld, item: String, price: i64) {
    let db = world.system().ledger.db().clone();
    db.append_row(ARCHIVE_TABLE, item_row("a_1_1000", &item, Some(price), "Bob")).await.expect("Error seeding archive");
}

#[given(expr = "a manual operation is in progress")]
async fn manual_operation_started(world: &mut LedgerWorld) {
    let sys = world.system();
    sys.manual_operation = Some(sys.ledger.gate().begin_manual());
}

//----------------------------------------------   Actions   --------------------------------------------------
#[when(expr = "{string} attends {string} at {string}")]
async fn attends(world: &mut LedgerWorld, member: String, boss: String, timestamp: String) {
    let sys = world.system();
    sys.attendance.submit_attendance(&boss, &timestamp, &[member.as_str()]).await.expect("Error submitting attendance");
}

#[when(expr = "{string} attends {string} at {string} again")]
async fn attends_again(world: &mut LedgerWorld, member: String, boss: String, timestamp: String) {
    let sys = world.system();
    sys.last_error = sys.attendance.submit_attendance(&boss, &timestamp, &[member.as_str()]).await.err();
}

#[when(expr = "{string} wins {string} for {int} points in an auction session")]
async fn wins_in_session(world: &mut LedgerWorld, member: String, item: String, amount: i64) {
    let sys = world.system();
    let amount = Points::from(amount);
    let listing = sys
        .auctions
        .list_item(NewAuctionItem::new(item).with_start_price(amount))
        .await
        .expect("Error listing item");
    sys.auctions.start_session().await.expect("Error starting session");
    sys.auctions.settle_item(&listing.item.id, Some(&member), amount, 1).await.expect("Error settling item");
    sys.auctions.close_session().await.expect("Error closing session");
}

#[when(expr = "the ledger is reconciled")]
async fn reconcile(world: &mut LedgerWorld) {
    world.system().ledger.reconcile_ledger().await.expect("Error reconciling ledger");
}

#[when(expr = "the ledger is read")]
async fn read_ledger(world: &mut LedgerWorld) {
    let sys = world.system();
    sys.last_view = Some(sys.ledger.get_ledger(false).await.expect("Error reading ledger"));
}

#[when(expr = "the points left of {string} are edited by hand to {int}")]
async fn edit_points_left(world: &mut LedgerWorld, member: String, points: i64) {
    let sys = world.system();
    let db = sys.ledger.db().clone();
    let rows = db.read_table(LEDGER_TABLE).await.expect("Error reading ledger");
    let row = rows.iter().position(|r| cell_at(r, ledger_cols::MEMBER).as_text() == member).expect("Member not found");
    db.write_range(LEDGER_TABLE, row, ledger_cols::POINTS_LEFT, vec![vec![Cell::Int(points)]])
        .await
        .expect("Error editing ledger");
    let edit = EditEvent::new(LEDGER_TABLE, row, ledger_cols::POINTS_LEFT);
    sys.last_edit = Some(sys.ledger.on_edit(&edit).await.expect("Error handling edit"));
}

#[when(expr = "an attendance checkbox is edited")]
async fn attendance_checkbox_edited(world: &mut LedgerWorld) {
    let sys = world.system();
    let edit = EditEvent::new(EDITED_ATTENDANCE_TABLE, 2, 1);
    sys.last_edit = Some(sys.ledger.on_edit(&edit).await.expect("Error handling edit"));
}

#[when(expr = "the manual operation finishes")]
async fn manual_operation_finished(world: &mut LedgerWorld) {
    world.system().manual_operation = None;
}

#[when(expr = "the settled items are archived")]
async fn archive_settled(world: &mut LedgerWorld) {
    let sys = world.system();
    let result = sys.auctions.archive_settled().await.expect("Error archiving items");
    assert!(!result.archived.is_empty(), "Nothing was archived");
}

#[when(expr = "the label {string} is matched against the catalog")]
async fn match_label(world: &mut LedgerWorld, label: String) {
    let sys = world.system();
    sys.last_match = Some(sys.auctions.match_catalog(&label).await.expect("Error matching label"));
}

//----------------------------------------------   Checks   ---------------------------------------------------
#[then(expr = "{string} has {int} point(s) left and {int} point(s) consumed")]
async fn check_balance(world: &mut LedgerWorld, key: String, left: i64, consumed: i64) {
    let sys = world.system();
    let view = sys.ledger.get_ledger(true).await.expect("Error reading ledger");
    let key = MemberKey::from_display(&key).expect("Not a valid member key");
    let balance = view.snapshot.get(&key).expect("Member is not in the ledger");
    assert_eq!(balance.points_left, Points::from(left), "Points left is incorrect");
    assert_eq!(balance.points_consumed, Points::from(consumed), "Points consumed is incorrect");
}

#[then(expr = "the submission is rejected as a duplicate column")]
async fn check_duplicate(world: &mut LedgerWorld) {
    let err = world.system().last_error.take();
    assert!(matches!(err, Some(LedgerError::DuplicateColumn(_))), "Expected a duplicate column error, got {err:?}");
}

#[then(expr = "the ledger was served from the cache")]
async fn check_cache_hit(world: &mut LedgerWorld) {
    let view = world.system().last_view.as_ref().expect("The ledger was not read");
    assert!(view.from_cache, "The ledger was read from the datastore");
}

#[then(expr = "the ledger was read from the datastore")]
async fn check_cache_miss(world: &mut LedgerWorld) {
    let view = world.system().last_view.as_ref().expect("The ledger was not read");
    assert!(!view.from_cache, "The ledger was served from the cache");
}

#[then(expr = "the ledger shows {int} points left for {string}")]
async fn check_view(world: &mut LedgerWorld, points: i64, member: String) {
    let view = world.system().last_view.as_ref().expect("The ledger was not read");
    let key = MemberKey::from_display(&member).expect("Not a valid member key");
    assert_eq!(view.snapshot.points_left(&key), Some(Points::from(points)));
}

fn ledger_trigger(world: &mut LedgerWorld) -> TriggerOutcome {
    let edit = world.system().last_edit.as_ref().expect("No edit was made");
    edit.triggers
        .iter()
        .find(|(t, _)| *t == RecomputeTarget::Ledger)
        .map(|(_, o)| o.clone())
        .expect("The edit did not reach the ledger")
}

#[then(expr = "the ledger recompute ran")]
async fn check_ran(world: &mut LedgerWorld) {
    assert_eq!(ledger_trigger(world), TriggerOutcome::Ran);
}

#[then(expr = "the ledger recompute was debounced")]
async fn check_debounced(world: &mut LedgerWorld) {
    let outcome = ledger_trigger(world);
    assert!(matches!(outcome, TriggerOutcome::Skipped(Skipped::Debounced { .. })), "Got {outcome:?}");
}

#[then(expr = "the ledger recompute was suppressed")]
async fn check_suppressed(world: &mut LedgerWorld) {
    let outcome = ledger_trigger(world);
    assert_eq!(outcome, TriggerOutcome::Skipped(Skipped::ManualOperationInProgress));
}

#[then(expr = "the cache was invalidated without a recompute")]
async fn check_invalidated_only(world: &mut LedgerWorld) {
    let edit = world.system().last_edit.as_ref().expect("No edit was made");
    assert!(edit.triggers.is_empty(), "The edit triggered {:?}", edit.triggers);
}

#[then(expr = "the archive receives {string} in that order")]
async fn check_archive(world: &mut LedgerWorld, ids: String) {
    let db = world.system().ledger.db().clone();
    let rows = db.read_table(ARCHIVE_TABLE).await.expect("Error reading archive");
    let archived = rows.iter().skip(1).map(|r| cell_at(r, item_cols::ID).as_text()).collect::<Vec<_>>();
    assert_eq!(archived, id_list(&ids));
}

#[then(expr = "the working table holds {string}")]
async fn check_working_table(world: &mut LedgerWorld, ids: String) {
    let db = world.system().ledger.db().clone();
    let rows = db.read_table(ITEMS_TABLE).await.expect("Error reading working table");
    let remaining = rows.iter().skip(1).map(|r| cell_at(r, item_cols::ID).as_text()).collect::<Vec<_>>();
    assert_eq!(remaining, id_list(&ids));
}

#[then(expr = "the match is {string} with {int}% similarity and a suggested price of {int}")]
async fn check_match(world: &mut LedgerWorld, name: String, similarity: i64, price: i64) {
    let m = world.system().last_match.as_ref().expect("No label was matched");
    assert_eq!(m.corrected_name.as_deref(), Some(name.as_str()));
    assert_eq!((m.similarity * 100.0).round() as i64, similarity);
    assert_eq!(m.suggested_price, Some(Points::from(price)));
    assert!(!m.is_exact_match);
}

#[then(expr = "there is no catalog match")]
async fn check_no_match(world: &mut LedgerWorld) {
    let m = world.system().last_match.as_ref().expect("No label was matched");
    assert!(!m.is_match(), "Unexpected match {m:?}");
}
