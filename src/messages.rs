//! Wire protocol messages between the trainer and its workers.
//!
//! Every message is one JSON object on one line. Requests carry a `type`
//! field and, for the types that need one, a `data` payload; responses are
//! plain JSON objects. `RESULT` is fire-and-forget and gets no response.

use crate::creature::CreatureData;
use serde::{Deserialize, Serialize};

/// The only evaluation task the workers implement: maximize distance covered.
pub const TASK_MOVE_FAR: &str = "MOVE_FAR";

/// Structure of all messages sent from the workers to the trainer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Connectivity check. The whole object is echoed back with a
    /// `response` field added.
    #[serde(rename = "PING")]
    Ping {
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },

    /// Request one creature to evaluate.
    #[serde(rename = "GET_WORK")]
    GetWork,

    /// Request up to `maxWorkUnits` creatures to evaluate.
    #[serde(rename = "GET_WORK_BATCH")]
    GetWorkBatch { data: WorkBatchRequest },

    /// Submit a batch of results and request the next batch of work in one
    /// atomic exchange.
    #[serde(rename = "STEP_BATCH")]
    StepBatch { data: StepBatchRequest },

    /// Request the best evaluated creature, for playback. Does not mark the
    /// creature in-flight.
    #[serde(rename = "GET_BEST_CREATURE")]
    GetBestCreature,

    /// Request a human-readable status summary.
    #[serde(rename = "GET_SERVER_STATUS")]
    GetServerStatus,

    /// Report one evaluation result. Fire-and-forget.
    #[serde(rename = "RESULT")]
    Result { data: ResultPayload },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkBatchRequest {
    #[serde(rename = "maxWorkUnits")]
    pub max_work_units: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepBatchRequest {
    pub results: Vec<ResultPayload>,

    #[serde(rename = "maxWorkUnits")]
    pub max_work_units: u64,
}

/// One completed evaluation. The fitness is the maximum distance the
/// creature covered during the simulation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultPayload {
    /// Identifies the server run this result was computed for. Results from
    /// before a server restart are rejected.
    #[serde(rename = "experimentId")]
    pub experiment_id: String,

    /// The creature that was evaluated.
    pub id: String,

    #[serde(rename = "maxDistance")]
    pub max_distance: f64,

    #[serde(rename = "simulatedTime")]
    pub simulated_time: f64,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The evaluation task attached to a dispatched creature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,

    /// Id of the creature to evaluate.
    pub id: String,

    #[serde(rename = "experimentId")]
    pub experiment_id: String,
}

/// Response to a work request: either a creature to evaluate or a signal
/// that nothing is available right now.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status")]
pub enum WorkUnit {
    #[serde(rename = "OK")]
    Ok { task: Task, creature: CreatureData },

    #[serde(rename = "NO_WORK")]
    NoWork,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkBatchResponse {
    #[serde(rename = "workUnits")]
    pub work_units: Vec<WorkUnit>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepBatchResponse {
    #[serde(rename = "workUnits")]
    pub work_units: Vec<WorkUnit>,

    /// Human-readable status line, same text as `GET_SERVER_STATUS`.
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Check that requests parse exactly as the workers send them.
    #[test]
    fn recv_string() {
        assert_eq!(serde_json::from_str::<Request>(r#"{"type":"GET_WORK"}"#).unwrap(), Request::GetWork);
        assert_eq!(
            serde_json::from_str::<Request>(r#"{"type":"GET_BEST_CREATURE"}"#).unwrap(),
            Request::GetBestCreature
        );
        assert_eq!(
            serde_json::from_str::<Request>(r#"{"type":"GET_SERVER_STATUS"}"#).unwrap(),
            Request::GetServerStatus
        );
        assert_eq!(
            serde_json::from_str::<Request>(r#"{"type":"GET_WORK_BATCH","data":{"maxWorkUnits":5}}"#).unwrap(),
            Request::GetWorkBatch {
                data: WorkBatchRequest { max_work_units: 5 }
            }
        );
        assert_eq!(
            serde_json::from_str::<Request>(
                r#"{"type":"RESULT","data":{"experimentId":"abc","id":"xyz","maxDistance":12.5,"simulatedTime":30.0}}"#
            )
            .unwrap(),
            Request::Result {
                data: ResultPayload {
                    experiment_id: "abc".to_string(),
                    id: "xyz".to_string(),
                    max_distance: 12.5,
                    simulated_time: 30.0,
                    extra: serde_json::Map::new(),
                }
            }
        );
    }

    #[test]
    fn ping_keeps_unknown_fields() {
        let request: Request = serde_json::from_str(r#"{"type":"PING","token":7,"client":"bench"}"#).unwrap();
        let Request::Ping { extra } = &request else {
            panic!("expected a ping");
        };
        assert_eq!(extra.get("token"), Some(&serde_json::json!(7)));
        assert_eq!(extra.get("client"), Some(&serde_json::json!("bench")));
    }

    #[test]
    fn result_tolerates_extra_fields() {
        let request: Request = serde_json::from_str(
            r#"{"type":"RESULT","data":{"type":"RESULT","experimentId":"a","id":"b","maxDistance":1.0,"simulatedTime":2.0}}"#,
        )
        .unwrap();
        let Request::Result { data } = request else {
            panic!("expected a result");
        };
        assert_eq!(data.max_distance, 1.0);
        assert_eq!(data.extra.get("type"), Some(&serde_json::json!("RESULT")));
    }

    /// Check that responses serialize exactly as the workers expect.
    #[test]
    fn send_string() {
        assert_eq!(serde_json::to_string(&WorkUnit::NoWork).unwrap(), r#"{"status":"NO_WORK"}"#);
        assert_eq!(
            serde_json::to_string(&Task {
                name: TASK_MOVE_FAR.to_string(),
                id: "creature-1".to_string(),
                experiment_id: "run-1".to_string(),
            })
            .unwrap(),
            r#"{"name":"MOVE_FAR","id":"creature-1","experimentId":"run-1"}"#
        );
        assert_eq!(
            serde_json::to_string(&StatusResponse {
                status: "...waiting...".to_string()
            })
            .unwrap(),
            r#"{"status":"...waiting..."}"#
        );
        assert_eq!(
            serde_json::to_string(&WorkBatchResponse { work_units: vec![] }).unwrap(),
            r#"{"workUnits":[]}"#
        );
        assert_eq!(
            serde_json::to_string(&StepBatchResponse {
                work_units: vec![WorkUnit::NoWork],
                status: "idle".to_string(),
            })
            .unwrap(),
            r#"{"workUnits":[{"status":"NO_WORK"}],"status":"idle"}"#
        );
    }

    #[test]
    fn message_roundtrip() {
        let requests = [
            Request::GetWork,
            Request::GetBestCreature,
            Request::GetServerStatus,
            Request::GetWorkBatch {
                data: WorkBatchRequest { max_work_units: 3 },
            },
            Request::StepBatch {
                data: StepBatchRequest {
                    results: vec![ResultPayload {
                        experiment_id: "run".to_string(),
                        id: "creature".to_string(),
                        max_distance: -0.5,
                        simulated_time: 61.25,
                        extra: serde_json::Map::new(),
                    }],
                    max_work_units: 2,
                },
            },
        ];
        for message in requests {
            let json = serde_json::to_string(&message).unwrap();
            let received: Request = serde_json::from_str(&json).unwrap();
            assert_eq!(message, received);
            assert!(!json.contains('\n'));
        }
    }
}
