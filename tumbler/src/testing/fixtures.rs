//! Pipeline fixtures.

use crate::model::{Agent, Pipeline, Stage, Step};

/// The three-stage reference pipeline: two container stages followed by a
/// fail-fast parallel stage with three branches.
pub const REFERENCE_PIPELINE: &str = r#"
// Reference pipeline
pipeline {
    agent none
    stages {
        stage('Example Build') {
            agent { docker 'maven:3.9.0-eclipse-temurin-11' }
            steps {
                echo 'Hello, Maven'
                sh 'mvn --version'
            }
        }
        stage('Example Test') {
            agent { docker 'openjdk:8-jre' }
            steps {
                echo 'Hello, JDK'
                sh 'java -version'
            }
        }
        stage('Parallel Stage') {
            failFast true
            parallel {
                stage('Branch A') {
                    steps {
                        echo "On Branch A"
                    }
                }
                stage('Branch B') {
                    steps {
                        echo "On Branch B"
                    }
                }
                stage('Branch C') {
                    steps {
                        echo "On Branch C"
                    }
                }
            }
        }
    }
}
"#;

/// The tree [`REFERENCE_PIPELINE`] parses into.
#[must_use]
pub fn reference_pipeline() -> Pipeline {
    Pipeline::new(
        Agent::None,
        vec![
            Stage::new("Example Build")
                .with_agent(Agent::container("maven:3.9.0-eclipse-temurin-11"))
                .with_step(Step::single("echo", "Hello, Maven"))
                .with_step(Step::single("sh", "mvn --version")),
            Stage::new("Example Test")
                .with_agent(Agent::container("openjdk:8-jre"))
                .with_step(Step::single("echo", "Hello, JDK"))
                .with_step(Step::single("sh", "java -version")),
            fan_out(
                "Parallel Stage",
                vec![
                    echo_stage("Branch A", "On Branch A"),
                    echo_stage("Branch B", "On Branch B"),
                    echo_stage("Branch C", "On Branch C"),
                ],
            )
            .with_fail_fast(true),
        ],
    )
}

/// A stage with a single `echo` step.
#[must_use]
pub fn echo_stage(name: &str, message: &str) -> Stage {
    Stage::new(name).with_step(Step::single("echo", message))
}

/// A stage whose only content is a parallel group.
#[must_use]
pub fn fan_out(name: &str, branches: Vec<Stage>) -> Stage {
    Stage::new(name).with_parallel(branches)
}

/// A host-agent pipeline over the given stages.
#[must_use]
pub fn pipeline_of(stages: Vec<Stage>) -> Pipeline {
    Pipeline::new(Agent::None, stages)
}
