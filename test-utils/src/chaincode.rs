//! Chaincodes used by the integration tests.

use std::time::Duration;

use async_trait::async_trait;
use ccsupport::Response;
use ccsupport::shim::{Chaincode, ChaincodeStub};

/// Small calculator chaincode.
///
/// Functions: `echo <value>`, `divide <a> <b>`, `sleep <ms>`,
/// `event <name>`, `decoration <key>`. Unknown functions and `divide` by zero answer with an
/// error status, which the shim reports as ERROR.
#[derive(Debug, Default)]
pub struct TestChaincode;

#[async_trait]
impl Chaincode for TestChaincode {
    async fn init(&self, stub: &mut ChaincodeStub) -> Response {
        let (function, _) = stub.function_and_parameters();
        if function == "fail" {
            return Response::error("init refused");
        }
        Response::success(b"initialized".to_vec())
    }

    async fn invoke(&self, stub: &mut ChaincodeStub) -> Response {
        let (function, params) = stub.function_and_parameters();
        let param = |i: usize| params.get(i).cloned().unwrap_or_default();

        match function.as_str() {
            "echo" => Response::success(param(0).into_bytes()),
            "divide" => {
                let (Ok(a), Ok(b)) = (param(0).parse::<i64>(), param(1).parse::<i64>()) else {
                    return Response::error("divide expects two integers");
                };
                if b == 0 {
                    return Response::error("division by zero");
                }
                Response::success((a / b).to_string().into_bytes())
            }
            "sleep" => {
                let ms = param(0).parse::<u64>().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Response::success(b"slept".to_vec())
            }
            "decoration" => {
                Response::success(stub.decorations.get(&param(0)).cloned().unwrap_or_default())
            }
            "event" => {
                stub.set_event(param(0), b"payload".to_vec());
                Response::success(Vec::new())
            }
            other => Response::error(format!("unknown function {}", other)),
        }
    }
}
