use ndarray::{ArrayD, IxDyn};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dtype::DType;
use crate::graph::Program;
use crate::opcode::OpCode;
use crate::tensor::Tensor;

impl Serialize for Tensor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Tensor", 3)?;
        s.serialize_field("shape", self.shape())?;
        s.serialize_field("dtype", &self.dtype)?;
        s.serialize_field("data", &self.to_vec())?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Tensor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct TensorData {
            shape: Vec<usize>,
            dtype: DType,
            data: Vec<f64>,
        }

        let t = TensorData::deserialize(deserializer)?;
        let data =
            ArrayD::from_shape_vec(IxDyn(&t.shape), t.data).map_err(serde::de::Error::custom)?;
        Ok(Tensor::new(data, t.dtype))
    }
}

impl Serialize for Program {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.reads_borrowed() {
            return Err(serde::ser::Error::custom(
                "cannot serialize a Program that reads borrowed storage; \
                 recompile against the storage after deserialization",
            ));
        }
        let mut s = serializer.serialize_struct("Program", 5)?;
        s.serialize_field("opcodes", &self.opcodes)?;
        s.serialize_field("args", &self.args)?;
        s.serialize_field("values", &self.values)?;
        s.serialize_field("num_inputs", &self.num_inputs)?;
        s.serialize_field("outputs", &self.outputs)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Program {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct ProgramData {
            opcodes: Vec<OpCode>,
            args: Vec<[u32; 2]>,
            values: Vec<f64>,
            num_inputs: usize,
            outputs: Vec<u32>,
        }

        let data = ProgramData::deserialize(deserializer)?;
        let n = data.opcodes.len();
        if data.args.len() != n || data.values.len() != n {
            return Err(serde::de::Error::custom("program columns have different lengths"));
        }
        if data.outputs.iter().any(|&o| o as usize >= n) {
            return Err(serde::de::Error::custom("program output out of range"));
        }
        for (i, (&op, &[a, b])) in data.opcodes.iter().zip(&data.args).enumerate() {
            let forward = match op {
                OpCode::Shared | OpCode::Leaf => {
                    return Err(serde::de::Error::custom("program references trace-only nodes"))
                }
                OpCode::Input => a as usize >= data.num_inputs,
                OpCode::Const => false,
                _ if op.is_binary() => a as usize >= i || b as usize >= i,
                _ => a as usize >= i,
            };
            if forward {
                return Err(serde::de::Error::custom(format!("node {i} has an invalid operand")));
            }
        }
        Ok(Program {
            opcodes: data.opcodes,
            args: data.args,
            values: data.values,
            storages: Vec::new(),
            num_inputs: data.num_inputs,
            outputs: data.outputs,
        })
    }
}
